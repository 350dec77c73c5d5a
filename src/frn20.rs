//! FRN20 flow sensor
//!
//! The sensor answers 16-bit commands with fixed-length frames (see
//! [`crate::frame`]). A command is written in its own transaction and the
//! frame is fetched with one or more reads after a short settling delay.
//!
//! ```ignore
//!   use frn20_softi2c::frn20::Frn20;
//!
//!   let mut sensor = Frn20::new(i2c, delay);
//!   let params = sensor.begin()?;
//!   loop {
//!       let flow = sensor.read_mass_flow()?;
//!       // flow is in params.unit
//!   }
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::SevenBitAddress;
use fugit::MillisDurationU32;

use crate::frame::{self, FrameError, Params, FLOW_FRAME_LEN, PARAM_FRAME_LEN};
use crate::wire::{ByteSource, ReadRequest, Wire};

/// Factory-set I2C address
pub const DEFAULT_ADDRESS: SevenBitAddress = 0x40;

/// Returns a 5-byte flow frame
pub const CMD_READ_FLOW: u16 = 0x1000;

/// Returns a 41-byte parameter frame
pub const CMD_READ_PARAMS: u16 = 0xCCDD;

/// FRN20 error
#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Bus error, including address and data NAKs
    I2c(E),
    /// Frame received but rejected
    Frame(FrameError),
    /// Device returned fewer bytes than requested
    FrameLength { expected: usize, received: usize },
    /// Nowhere to store the response
    EmptyBuffer,
    /// Mass flow requested before calibration parameters were read
    ParametersNotLoaded,
    /// Parameters could not be read within the configured attempts
    NotResponding,
}

impl<E> From<FrameError> for Error<E> {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

/// Device session state
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Nothing known about the device yet
    Uninitialized,
    /// Device acknowledged its address
    Present,
    /// Calibration parameters loaded
    ParametersLoaded,
    /// At least one flow reading taken with parameters loaded
    Ready,
}

/// Sensor configuration
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Frn20Config {
    /// 7-bit device address
    pub address: SevenBitAddress,
    /// Wait between writing a command and reading its frame
    pub settle_delay: MillisDurationU32,
    /// Wait between parameter read attempts in [`Frn20::begin`]
    pub retry_delay: MillisDurationU32,
    /// Parameter read attempts in [`Frn20::begin`]
    pub param_retries: u8,
}

impl Default for Frn20Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            settle_delay: MillisDurationU32::millis(3),
            retry_delay: MillisDurationU32::millis(500),
            param_retries: 10,
        }
    }
}

impl Frn20Config {
    /// Use a device address other than [`DEFAULT_ADDRESS`]
    pub fn with_address(mut self, address: SevenBitAddress) -> Self {
        self.address = address;
        self
    }

    /// Set the wait between a command and its response
    pub fn with_settle_delay(mut self, delay: MillisDurationU32) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the parameter read attempts in [`Frn20::begin`] and the wait between them
    pub fn with_retries(mut self, retries: u8, delay: MillisDurationU32) -> Self {
        self.param_retries = retries;
        self.retry_delay = delay;
        self
    }
}

/// FRN20 driver over a Wire-style bus
pub struct Frn20<W, D> {
    wire: W,
    delay: D,
    config: Frn20Config,
    state: State,
    params: Option<Params>,
    raw_flow: Option<u16>,
    mass_flow: Option<f32>,
}

impl<W, D> Frn20<W, D>
where
    W: Wire,
    D: DelayNs,
{
    /// Create a driver at the default address
    pub fn new(wire: W, delay: D) -> Self {
        Self::with_config(wire, delay, Frn20Config::default())
    }

    /// Create a driver with a custom configuration
    pub fn with_config(wire: W, delay: D, config: Frn20Config) -> Self {
        Frn20 {
            wire,
            delay,
            config,
            state: State::Uninitialized,
            params: None,
            raw_flow: None,
            mass_flow: None,
        }
    }

    /// Give back the bus and the delay provider
    pub fn release(self) -> (W, D) {
        (self.wire, self.delay)
    }

    /// Active configuration
    pub fn config(&self) -> &Frn20Config {
        &self.config
    }

    /// Current session state
    pub fn state(&self) -> State {
        self.state
    }

    /// Parameters from the last successful [`load_parameters`](Self::load_parameters)
    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    /// Last successful raw flow reading
    pub fn raw_flow(&self) -> Option<u16> {
        self.raw_flow
    }

    /// Last successful mass flow reading, in the unit of [`params`](Self::params)
    pub fn mass_flow(&self) -> Option<f32> {
        self.mass_flow
    }

    /// Initialise the bus, probe the device, then load its parameters.
    ///
    /// A line held low after bus initialisation fails here, before any
    /// device is addressed.
    ///
    /// Parameter reads are retried up to `param_retries` times,
    /// `retry_delay` apart. Fails with [`Error::NotResponding`] if none
    /// succeeds.
    pub fn begin(&mut self) -> Result<Params, Error<W::Error>> {
        self.wire.begin().map_err(Error::I2c)?;
        self.probe_device()?;

        let attempts = self.config.param_retries.max(1);
        for attempt in 1..=attempts {
            match self.load_parameters() {
                Ok(params) => return Ok(params),
                Err(_) if attempt < attempts => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("frn20: parameter read failed, attempt {=u8}", attempt);
                    self.delay.delay_ms(self.config.retry_delay.to_millis());
                }
                Err(_) => {}
            }
        }

        #[cfg(feature = "defmt")]
        defmt::error!("frn20: no parameters after {=u8} attempts", attempts);
        Err(Error::NotResponding)
    }

    /// Check that the device acknowledges its address.
    pub fn probe_device(&mut self) -> Result<(), Error<W::Error>> {
        let address = self.config.address;
        self.wire.begin_transmission(address).map_err(Error::I2c)?;
        self.wire.end_transmission(true).map_err(Error::I2c)?;

        if self.state == State::Uninitialized {
            self.state = State::Present;
        }
        Ok(())
    }

    /// Read and decode the calibration parameters.
    ///
    /// On failure the previously loaded parameters are kept.
    pub fn load_parameters(&mut self) -> Result<Params, Error<W::Error>> {
        let mut frame = [0u8; PARAM_FRAME_LEN];
        self.read_register(CMD_READ_PARAMS, &mut frame)?;

        let params = frame::decode_params(&frame).map_err(|e| {
            #[cfg(feature = "defmt")]
            defmt::warn!("frn20: parameter frame rejected: {}", e);
            Error::Frame(e)
        })?;

        self.params = Some(params);
        if self.state < State::ParametersLoaded {
            self.state = State::ParametersLoaded;
        }
        Ok(params)
    }

    /// Read the raw flow count.
    ///
    /// On failure the previous reading is kept.
    pub fn read_raw_flow(&mut self) -> Result<u16, Error<W::Error>> {
        let mut frame = [0u8; FLOW_FRAME_LEN];
        self.read_register(CMD_READ_FLOW, &mut frame)?;

        let raw = frame::decode_flow(&frame).map_err(|e| {
            #[cfg(feature = "defmt")]
            defmt::warn!("frn20: flow frame rejected: {}", e);
            Error::Frame(e)
        })?;

        self.raw_flow = Some(raw);
        if self.state == State::ParametersLoaded {
            self.state = State::Ready;
        }
        Ok(raw)
    }

    /// Read the flow and scale it with the loaded parameters.
    pub fn read_mass_flow(&mut self) -> Result<f32, Error<W::Error>> {
        let params = self.params.ok_or(Error::ParametersNotLoaded)?;
        let raw = self.read_raw_flow()?;
        let flow = params.mass_flow(raw)?;
        self.mass_flow = Some(flow);
        Ok(flow)
    }

    /// Send `command` and read its response into `out`.
    ///
    /// Responses larger than the bus receive buffer are fetched in
    /// consecutive reads of at most the buffer capacity. Returns the number
    /// of bytes read, which is always `out.len()`.
    pub fn read_register(&mut self, command: u16, out: &mut [u8]) -> Result<usize, Error<W::Error>> {
        if out.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        let address = self.config.address;
        let expected = out.len();

        self.wire.begin_transmission(address).map_err(Error::I2c)?;
        self.wire.transmit(&command.to_be_bytes()).map_err(Error::I2c)?;
        self.wire.end_transmission(true).map_err(|e| {
            #[cfg(feature = "defmt")]
            defmt::debug!("frn20: command {=u16:#x} not acknowledged", command);
            Error::I2c(e)
        })?;

        self.delay.delay_ms(self.config.settle_delay.to_millis());

        let chunk_len = self.wire.capacity().max(1);
        let mut received = 0;
        for chunk in out.chunks_mut(chunk_len) {
            let count = self
                .wire
                .request_from(address, ReadRequest::new(chunk.len()))
                .map_err(Error::I2c)?;
            if count != chunk.len() {
                #[cfg(feature = "defmt")]
                defmt::debug!("frn20: short read, {=usize} of {=usize}", received + count, expected);
                return Err(Error::FrameLength {
                    expected,
                    received: received + count,
                });
            }
            for slot in chunk.iter_mut() {
                match self.wire.read() {
                    Some(byte) => *slot = byte,
                    None => return Err(Error::FrameLength { expected, received }),
                }
                received += 1;
            }
        }
        Ok(received)
    }
}
