//! Simulated I2C slave for host tests.
//!
//! Both bus lines share one [`SimState`]. Every pin call updates the wired-AND
//! line levels and feeds the resulting edges to a slave state machine that
//! acknowledges its address, records written bytes and clocks out responses
//! selected by a 16-bit command.

use core::convert::Infallible;
use embedded_hal::digital::ErrorType;
use embedded_hal_mock::eh1::delay::NoopDelay;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use crate::i2c::{BusConfig, SoftI2c, DEFAULT_BUFFER_LEN};
use crate::line::{FlexPin, Pull};

/// Scripted device behind the simulated bus
pub struct SimDevice {
    address: u8,
    responses: Vec<(u16, Vec<u8>)>,
    corrupt: Vec<(u16, usize)>,
    current: Vec<u8>,
    cursor: usize,
    written: Vec<u8>,
    command: Vec<u8>,
    ack_limit: Option<usize>,
    acked_in_write: usize,
}

impl SimDevice {
    pub fn new(address: u8) -> Self {
        SimDevice {
            address,
            responses: Vec::new(),
            corrupt: Vec::new(),
            current: Vec::new(),
            cursor: 0,
            written: Vec::new(),
            command: Vec::new(),
            ack_limit: None,
            acked_in_write: 0,
        }
    }

    /// Bytes served to reads issued before any command is written
    pub fn with_stream(mut self, bytes: &[u8]) -> Self {
        self.current = bytes.to_vec();
        self
    }

    /// Frame served after `command` is written
    pub fn with_response(mut self, command: u16, frame: &[u8]) -> Self {
        self.responses.push((command, frame.to_vec()));
        self
    }

    /// Serve the next `times` responses to `command` with one bit flipped
    pub fn corrupt_first(mut self, command: u16, times: usize) -> Self {
        self.corrupt.push((command, times));
        self
    }

    /// Acknowledge only the first `count` data bytes of each write
    pub fn nak_after(mut self, count: usize) -> Self {
        self.ack_limit = Some(count);
        self
    }

    fn begin_write(&mut self) {
        self.command.clear();
        self.acked_in_write = 0;
    }

    fn accept(&mut self, byte: u8) -> bool {
        if let Some(limit) = self.ack_limit {
            if self.acked_in_write >= limit {
                return false;
            }
        }
        self.acked_in_write += 1;
        self.written.push(byte);
        self.command.push(byte);
        if self.command.len() == 2 {
            let command = u16::from_be_bytes([self.command[0], self.command[1]]);
            self.select(command);
        }
        true
    }

    fn select(&mut self, command: u16) {
        if let Some((_, frame)) = self.responses.iter().find(|(c, _)| *c == command) {
            self.current = frame.clone();
            self.cursor = 0;
            if let Some((_, remaining)) = self.corrupt.iter_mut().find(|(c, _)| *c == command) {
                if *remaining > 0 && !self.current.is_empty() {
                    *remaining -= 1;
                    self.current[0] ^= 0x01;
                }
            }
        }
    }

    fn next_byte(&mut self) -> u8 {
        let byte = self.current.get(self.cursor).copied().unwrap_or(0xFF);
        self.cursor += 1;
        byte
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    Address,
    AddressAck { read: bool },
    Receive,
    ReceiveAck,
    Transmit,
    TransmitAck { acked: bool },
}

pub struct SimState {
    master_sda_low: bool,
    master_scl_low: bool,
    slave_sda_low: bool,
    sda_stuck: bool,
    phase: Phase,
    shift: u8,
    bits: u8,
    starts: usize,
    stops: usize,
    device: SimDevice,
}

impl SimState {
    fn sda(&self) -> bool {
        !(self.master_sda_low || self.slave_sda_low || self.sda_stuck)
    }

    fn scl(&self) -> bool {
        !self.master_scl_low
    }

    fn drive_master(&mut self, line: Which, low: bool) {
        let (sda_before, scl_before) = (self.sda(), self.scl());
        match line {
            Which::Sda => self.master_sda_low = low,
            Which::Scl => self.master_scl_low = low,
        }
        let (sda_after, scl_after) = (self.sda(), self.scl());

        if scl_before && scl_after && sda_before != sda_after {
            if sda_before {
                self.on_start();
            } else {
                self.on_stop();
            }
        } else if !scl_before && scl_after {
            self.on_scl_rise();
        } else if scl_before && !scl_after {
            self.on_scl_fall();
        }
    }

    fn on_start(&mut self) {
        self.starts += 1;
        self.slave_sda_low = false;
        self.phase = Phase::Address;
        self.shift = 0;
        self.bits = 0;
    }

    fn on_stop(&mut self) {
        self.stops += 1;
        self.slave_sda_low = false;
        self.phase = Phase::Idle;
    }

    fn on_scl_rise(&mut self) {
        let level = self.sda() as u8;
        match self.phase {
            Phase::Address | Phase::Receive => {
                self.shift = (self.shift << 1) | level;
                self.bits += 1;
            }
            Phase::TransmitAck { .. } => {
                self.phase = Phase::TransmitAck { acked: level == 0 };
            }
            _ => {}
        }
    }

    fn on_scl_fall(&mut self) {
        match self.phase {
            Phase::Address if self.bits == 8 => {
                if self.shift >> 1 == self.device.address {
                    self.slave_sda_low = true;
                    self.phase = Phase::AddressAck {
                        read: self.shift & 1 == 1,
                    };
                } else {
                    self.phase = Phase::Idle;
                }
            }
            Phase::AddressAck { read } => {
                self.slave_sda_low = false;
                if read {
                    self.load_next_byte();
                } else {
                    self.device.begin_write();
                    self.phase = Phase::Receive;
                    self.shift = 0;
                    self.bits = 0;
                }
            }
            Phase::Receive if self.bits == 8 => {
                if self.device.accept(self.shift) {
                    self.slave_sda_low = true;
                    self.phase = Phase::ReceiveAck;
                } else {
                    self.phase = Phase::Idle;
                }
            }
            Phase::ReceiveAck => {
                self.slave_sda_low = false;
                self.phase = Phase::Receive;
                self.shift = 0;
                self.bits = 0;
            }
            Phase::Transmit => {
                self.bits += 1;
                if self.bits < 8 {
                    self.slave_sda_low = (self.shift >> (7 - self.bits)) & 1 == 0;
                } else {
                    self.slave_sda_low = false;
                    self.phase = Phase::TransmitAck { acked: false };
                }
            }
            Phase::TransmitAck { acked } => {
                if acked {
                    self.load_next_byte();
                } else {
                    self.phase = Phase::Idle;
                }
            }
            _ => {}
        }
    }

    fn load_next_byte(&mut self) {
        self.shift = self.device.next_byte();
        self.bits = 0;
        self.phase = Phase::Transmit;
        self.slave_sda_low = self.shift & 0x80 == 0;
    }
}

#[derive(Clone, Copy)]
enum Which {
    Sda,
    Scl,
}

/// One simulated pin, sharing bus state with its partner line
pub struct SimPin {
    state: Rc<RefCell<SimState>>,
    which: Which,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl FlexPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_as_output(&mut self) -> Result<(), Infallible> {
        self.state.borrow_mut().drive_master(self.which, true);
        Ok(())
    }

    fn set_as_input(&mut self, _pull: Pull) -> Result<(), Infallible> {
        self.state.borrow_mut().drive_master(self.which, false);
        Ok(())
    }

    fn is_high(&mut self) -> Result<bool, Infallible> {
        let state = self.state.borrow();
        Ok(match self.which {
            Which::Sda => state.sda(),
            Which::Scl => state.scl(),
        })
    }
}

pub type SimI2c<const N: usize = DEFAULT_BUFFER_LEN> = SoftI2c<SimPin, SimPin, NoopDelay, N>;

/// Handle on a simulated bus with one device attached
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

impl SimBus {
    pub fn new(device: SimDevice) -> Self {
        SimBus {
            state: Rc::new(RefCell::new(SimState {
                master_sda_low: false,
                master_scl_low: false,
                slave_sda_low: false,
                sda_stuck: false,
                phase: Phase::Idle,
                shift: 0,
                bits: 0,
                starts: 0,
                stops: 0,
                device,
            })),
        }
    }

    pub fn i2c(&self) -> SimI2c {
        self.i2c_with_buffer()
    }

    pub fn i2c_with_buffer<const N: usize>(&self) -> SimI2c<N> {
        SoftI2c::new(
            self.pin(Which::Scl),
            self.pin(Which::Sda),
            NoopDelay::new(),
            BusConfig::default().with_pull(Pull::Up),
        )
    }

    fn pin(&self, which: Which) -> SimPin {
        SimPin {
            state: Rc::clone(&self.state),
            which,
        }
    }

    /// Hold SDA low from outside, as a crashed device would
    pub fn set_sda_stuck(&self, stuck: bool) {
        self.state.borrow_mut().sda_stuck = stuck;
    }

    /// Start conditions seen, repeated starts included
    pub fn starts(&self) -> usize {
        self.state.borrow().starts
    }

    pub fn stops(&self) -> usize {
        self.state.borrow().stops
    }

    /// Data bytes the device acknowledged
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().device.written.clone()
    }

    /// Both lines released and the device waiting for a start
    pub fn bus_idle(&self) -> bool {
        let state = self.state.borrow();
        state.sda() && state.scl() && state.phase == Phase::Idle
    }
}
