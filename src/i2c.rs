/*!
# Synchronous bitbang I2C master

This implementation consumes the following hardware resources:
- A blocking delay provider to time each bit
- Two GPIO pins for SDA and SCL lines, switchable between input and output.

Lines are emulated as open-drain: they are pulled low by switching the pin to
output and released by switching it back to input. See [`crate::line`].

Note that the current implementation does not support I2C clock stretching
or multi-master arbitration. One fixed bit delay drives all timing.

## Hardware requirements

1. Pull-up resistors on both lines, or [`Pull::Up`] if the MCU provides them.
2. A bit delay long enough for the slowest device on the bus. The default
   of 500 µs is conservative; [`BusConfig::from_rate`] derives it from a
   target clock rate.

## Example

```ignore
  use frn20_softi2c::i2c::{BusConfig, SoftI2c};
  use frn20_softi2c::line::OpenDrain;
  use fugit::RateExtU32;

  let scl = OpenDrain::new(gpioa.pa1.into_open_drain_output(&mut gpioa.crl));
  let sda = OpenDrain::new(gpioa.pa2.into_open_drain_output(&mut gpioa.crl));

  let mut i2c = SoftI2c::new(scl, sda, delay, BusConfig::from_rate(10.kHz()));
  i2c.begin().unwrap();
```
*/

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{
    ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress,
};
use fugit::{HertzU32, MicrosDurationU32};
use heapless::Vec;

use crate::line::{FlexPin, Line, Pull};

/// Default receive buffer capacity in bytes
pub const DEFAULT_BUFFER_LEN: usize = 45;

/// Attempts made by [`SoftI2c::raw_start_wait`] before giving up
pub const MAX_START_RETRIES: u16 = 5000;

const I2C_READ: u8 = 1;
const I2C_WRITE: u8 = 0;

/// I2C error
#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// GPIO error
    Bus(E),
    /// No ack received
    NoAck(NoAcknowledgeSource),
    /// SDA or SCL still reads low after being released
    BusStuck,
}

impl<E> Error<E> {
    /// Numeric transaction status as reported by Wire-style APIs.
    ///
    /// `2` is an address NAK, `3` a data NAK and `4` any other failure.
    pub fn code(&self) -> u8 {
        match self {
            Error::NoAck(NoAcknowledgeSource::Data) => 3,
            Error::NoAck(_) => 2,
            Error::Bus(_) | Error::BusStuck => 4,
        }
    }
}

impl<E: core::fmt::Debug> embedded_hal::i2c::Error for Error<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Bus(_) => ErrorKind::Bus,
            Error::NoAck(source) => ErrorKind::NoAcknowledge(*source),
            Error::BusStuck => ErrorKind::Bus,
        }
    }
}

/// Bus timing and line configuration
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BusConfig {
    /// Pull resistor used while a line is released
    pub pull: Pull,
    /// Delay between clock edges. ACK phases use half of it.
    pub bit_delay: MicrosDurationU32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pull: Pull::None,
            bit_delay: MicrosDurationU32::micros(500),
        }
    }
}

impl BusConfig {
    /// Configuration running the clock at approximately `rate`
    pub fn from_rate(rate: HertzU32) -> Self {
        let hz = rate.to_Hz().max(1);
        Self {
            bit_delay: MicrosDurationU32::from_ticks((1_000_000 / hz).max(1)),
            ..Self::default()
        }
    }

    /// Set the pull resistor used while lines are released
    pub fn with_pull(mut self, pull: Pull) -> Self {
        self.pull = pull;
        self
    }

    /// Set the bit delay
    pub fn with_bit_delay(mut self, bit_delay: MicrosDurationU32) -> Self {
        self.bit_delay = bit_delay;
        self
    }
}

fn is_empty_read(operation: &Operation<'_>) -> bool {
    matches!(operation, Operation::Read(buffer) if buffer.is_empty())
}

#[inline]
pub(crate) fn address_byte(address: SevenBitAddress, read: bool) -> u8 {
    (address << 1) | if read { I2C_READ } else { I2C_WRITE }
}

/// Bit banging I2C master
///
/// `N` is the capacity of the receive buffer used by the Wire-style
/// transaction API in [`crate::wire`].
pub struct SoftI2c<SCL, SDA, DELAY, const N: usize = DEFAULT_BUFFER_LEN>
where
    SCL: FlexPin,
    SDA: FlexPin,
    DELAY: DelayNs,
{
    pub(crate) scl: Line<SCL>,
    pub(crate) sda: Line<SDA>,
    pub(crate) delay: DELAY,
    pub(crate) config: BusConfig,
    pub(crate) transmitting: bool,
    pub(crate) pending: Option<NoAcknowledgeSource>,
    pub(crate) rx: Vec<u8, N>,
    pub(crate) rx_index: usize,
}

impl<SCL, SDA, DELAY, E, const N: usize> SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
{
    /// Create instance
    pub fn new(scl: SCL, sda: SDA, delay: DELAY, config: BusConfig) -> Self {
        SoftI2c {
            scl: Line::new(scl, config.pull),
            sda: Line::new(sda, config.pull),
            delay,
            config,
            transmitting: false,
            pending: None,
            rx: Vec::new(),
            rx_index: 0,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Give back the pins and the delay provider
    pub fn release(self) -> (SCL, SDA, DELAY) {
        (self.scl.into_inner(), self.sda.into_inner(), self.delay)
    }

    /// Send a raw I2C start followed by `address_byte`.
    ///
    /// `address_byte` is the 7-bit address shifted left with the R/W flag
    /// in bit 0. Returns whether the device acknowledged it.
    ///
    /// **This is a low-level control function.** For normal I2C devices,
    /// please use the embedded-hal [I2c] trait or the Wire-style API.
    pub fn raw_start(&mut self, address_byte: u8) -> Result<bool, Error<E>> {
        self.set_sda_low()?;
        self.wait_for_clk();
        self.set_scl_low()?;
        self.raw_write_byte(address_byte)
    }

    /// Send a repeated start followed by `address_byte`.
    ///
    /// The bus is not released in between, so the same device can be
    /// addressed again in the other direction.
    pub fn raw_repeated_start(&mut self, address_byte: u8) -> Result<bool, Error<E>> {
        self.set_sda_high()?;
        self.set_scl_high()?;
        self.wait_for_clk();
        self.raw_start(address_byte)
    }

    /// Send starts until the device acknowledges `address_byte`.
    ///
    /// Every refused attempt is closed with a stop. Gives up and returns
    /// `false` after [`MAX_START_RETRIES`] attempts.
    pub fn raw_start_wait(&mut self, address_byte: u8) -> Result<bool, Error<E>> {
        for _ in 0..MAX_START_RETRIES {
            if self.raw_start(address_byte)? {
                return Ok(true);
            }
            self.raw_stop()?;
        }
        Ok(false)
    }

    /// Send a raw I2C stop, releasing the bus.
    pub fn raw_stop(&mut self) -> Result<(), Error<E>> {
        self.set_sda_low()?;
        self.wait_for_clk();

        self.set_scl_high()?;
        self.wait_for_clk();

        self.set_sda_high()?;
        self.wait_for_clk();

        Ok(())
    }

    /// Clock out one byte MSB first and sample the ACK bit.
    ///
    /// Returns `true` if the receiver pulled SDA low during the ninth clock.
    pub fn raw_write_byte(&mut self, byte: u8) -> Result<bool, Error<E>> {
        for bit_offset in 0..8 {
            let out_bit = (byte >> (7 - bit_offset)) & 0b1;

            if out_bit == 1 {
                self.set_sda_high()?;
            } else {
                self.set_sda_low()?;
            }

            self.set_scl_high()?;
            self.wait_for_clk();
            self.set_scl_low()?;
        }

        self.set_sda_high()?;
        self.set_scl_high()?;
        self.wait_for_half_clk();

        let ack = self.sda.is_low().map_err(Error::Bus)?;

        self.set_scl_low()?;
        self.wait_for_half_clk();
        self.set_sda_low()?;

        Ok(ack)
    }

    /// Clock in one byte MSB first.
    ///
    /// Answers with NAK when `last` is set, ACK otherwise.
    pub fn raw_read_byte(&mut self, last: bool) -> Result<u8, Error<E>> {
        let mut byte: u8 = 0;

        self.set_sda_high()?;

        for _ in 0..8 {
            byte <<= 1;
            self.wait_for_clk();
            self.set_scl_high()?;

            if self.sda.is_high().map_err(Error::Bus)? {
                byte |= 1;
            }

            self.set_scl_low()?;
        }

        if last {
            self.set_sda_high()?;
        } else {
            self.set_sda_low()?;
        }

        self.set_scl_high()?;
        self.wait_for_half_clk();
        self.set_scl_low()?;
        self.wait_for_half_clk();
        self.set_sda_low()?;

        Ok(byte)
    }

    /// Read raw bytes from the slave, NAKing the final byte if `nak_last`.
    #[inline]
    pub fn raw_read_from_slave(
        &mut self,
        input: &mut [u8],
        nak_last: bool,
    ) -> Result<(), Error<E>> {
        let last_index = input.len().saturating_sub(1);
        for (i, byte) in input.iter_mut().enumerate() {
            *byte = self.raw_read_byte(nak_last && i == last_index)?;
        }
        Ok(())
    }

    /// Send raw bytes to the slave, failing on the first NAK.
    #[inline]
    pub fn raw_write_to_slave(&mut self, output: &[u8]) -> Result<(), Error<E>> {
        for byte in output {
            if !self.raw_write_byte(*byte)? {
                return Err(Error::NoAck(NoAcknowledgeSource::Data));
            }
        }
        Ok(())
    }

    fn address_device(
        &mut self,
        address: SevenBitAddress,
        read: bool,
        repeated: bool,
    ) -> Result<(), Error<E>> {
        let byte = address_byte(address, read);
        let ack = if repeated {
            self.raw_repeated_start(byte)?
        } else {
            self.raw_start(byte)?
        };
        if ack {
            Ok(())
        } else {
            Err(Error::NoAck(NoAcknowledgeSource::Address))
        }
    }

    /// Run the operations, returning whether anything was put on the bus.
    fn run_operations(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<bool, Error<E>> {
        // Some(true) after a read, Some(false) after a write
        let mut previous: Option<bool> = None;
        for index in 0..operations.len() {
            // an addressed slave holds SDA until it sees a NAK, so empty
            // reads are not put on the bus at all
            if is_empty_read(&operations[index]) {
                continue;
            }
            let next_is_read = matches!(
                operations[index + 1..].iter().find(|op| !is_empty_read(op)),
                Some(Operation::Read(_))
            );
            match &mut operations[index] {
                Operation::Read(buffer) => {
                    if previous != Some(true) {
                        // ST or SR + SAD + R
                        self.address_device(address, true, previous.is_some())?;
                    }
                    self.raw_read_from_slave(buffer, !next_is_read)?;
                    previous = Some(true);
                }
                Operation::Write(bytes) => {
                    if previous != Some(false) {
                        // ST or SR + SAD + W
                        self.address_device(address, false, previous.is_some())?;
                    }
                    self.raw_write_to_slave(bytes)?;
                    previous = Some(false);
                }
            }
        }
        Ok(previous.is_some())
    }

    #[inline]
    pub(crate) fn set_scl_high(&mut self) -> Result<(), Error<E>> {
        self.scl.set_high().map_err(Error::Bus)
    }

    #[inline]
    pub(crate) fn set_scl_low(&mut self) -> Result<(), Error<E>> {
        self.scl.set_low().map_err(Error::Bus)
    }

    #[inline]
    pub(crate) fn set_sda_high(&mut self) -> Result<(), Error<E>> {
        self.sda.set_high().map_err(Error::Bus)
    }

    #[inline]
    pub(crate) fn set_sda_low(&mut self) -> Result<(), Error<E>> {
        self.sda.set_low().map_err(Error::Bus)
    }

    #[inline]
    fn wait_for_clk(&mut self) {
        self.delay.delay_us(self.config.bit_delay.to_micros());
    }

    #[inline]
    fn wait_for_half_clk(&mut self) {
        self.delay.delay_us(self.config.bit_delay.to_micros() / 2);
    }
}

impl<SCL, SDA, DELAY, E, const N: usize> ErrorType for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
    E: core::fmt::Debug,
{
    type Error = crate::i2c::Error<E>;
}

impl<SCL, SDA, DELAY, E, const N: usize> I2c for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
    E: core::fmt::Debug,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error<E>> {
        match self.run_operations(address, operations) {
            Ok(started) => {
                if started {
                    // SP
                    self.raw_stop()?;
                }
                self.transmitting = false;
                Ok(())
            }
            Err(e) => {
                // the error being returned matters more than a failed stop
                self.raw_stop().ok();
                self.transmitting = false;
                Err(e)
            }
        }
    }
}
