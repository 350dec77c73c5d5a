//! Wire-style transaction layer
//!
//! Buffered master API on top of [`SoftI2c`]: open a transmission, write
//! bytes, close it with or without a stop, and request a block of bytes into
//! the receive buffer. NAKs are not returned by the individual writes. They
//! are recorded and reported once by [`SoftI2c::end_transmission`], or as a
//! zero byte count by [`SoftI2c::request_from`].

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{NoAcknowledgeSource, SevenBitAddress};

use crate::i2c::{address_byte, Error, SoftI2c};
use crate::line::FlexPin;

/// Largest internal register address, in bytes
pub const MAX_INTERNAL_ADDRESS_LEN: u8 = 3;

/// Register address written before a read, most significant byte first
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InternalAddress {
    value: u32,
    size: u8,
}

impl InternalAddress {
    /// `size` is clamped to [`MAX_INTERNAL_ADDRESS_LEN`]
    pub fn new(value: u32, size: u8) -> Self {
        InternalAddress {
            value,
            size: size.min(MAX_INTERNAL_ADDRESS_LEN),
        }
    }

    /// Number of address bytes written
    pub fn len(&self) -> usize {
        usize::from(self.size)
    }

    /// No address bytes, the read starts at the device's current register
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Parameters of a [`SoftI2c::request_from`] call
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadRequest {
    /// Bytes to read. Clamped to the receive buffer capacity.
    pub quantity: usize,
    /// Register address to write first, without releasing the bus
    pub register: Option<InternalAddress>,
    /// Issue a stop once the read completes
    pub stop: bool,
}

impl ReadRequest {
    /// Read `quantity` bytes and stop, without a register address
    pub fn new(quantity: usize) -> Self {
        ReadRequest {
            quantity,
            register: None,
            stop: true,
        }
    }

    /// Write `size` bytes of `value` before reading
    pub fn with_register(mut self, value: u32, size: u8) -> Self {
        self.register = Some(InternalAddress::new(value, size));
        self
    }

    /// Keep the bus after the read so the next transfer uses a repeated start
    pub fn without_stop(mut self) -> Self {
        self.stop = false;
        self
    }
}

/// Read access to a buffered response
pub trait ByteSource {
    /// Bytes left to read
    fn available(&self) -> usize;

    /// Take the next byte, `None` once the buffer is exhausted
    fn read(&mut self) -> Option<u8>;

    /// Look at the next byte without consuming it
    fn peek(&self) -> Option<u8>;
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    fn available(&self) -> usize {
        T::available(self)
    }

    fn read(&mut self) -> Option<u8> {
        T::read(self)
    }

    fn peek(&self) -> Option<u8> {
        T::peek(self)
    }
}

/// Transaction-level I2C master
///
/// Implemented by [`SoftI2c`]; device drivers written against this trait
/// can also run on a borrowed bus.
pub trait Wire: ByteSource {
    type Error: core::fmt::Debug;

    /// Receive buffer capacity, the most a single request can return
    fn capacity(&self) -> usize;

    /// Reset the transaction state and release the bus
    fn begin(&mut self) -> Result<(), Self::Error>;

    /// Address a device for writing
    fn begin_transmission(&mut self, address: SevenBitAddress) -> Result<(), Self::Error>;

    /// Returns how many bytes were acknowledged
    fn transmit(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Close the transmission, reporting any NAK since it was opened
    fn end_transmission(&mut self, stop: bool) -> Result<(), Self::Error>;

    /// Returns how many bytes are now available
    fn request_from(
        &mut self,
        address: SevenBitAddress,
        request: ReadRequest,
    ) -> Result<usize, Self::Error>;
}

impl<W: Wire + ?Sized> Wire for &mut W {
    type Error = W::Error;

    fn capacity(&self) -> usize {
        W::capacity(self)
    }

    fn begin(&mut self) -> Result<(), Self::Error> {
        W::begin(self)
    }

    fn begin_transmission(&mut self, address: SevenBitAddress) -> Result<(), Self::Error> {
        W::begin_transmission(self, address)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        W::transmit(self, data)
    }

    fn end_transmission(&mut self, stop: bool) -> Result<(), Self::Error> {
        W::end_transmission(self, stop)
    }

    fn request_from(
        &mut self,
        address: SevenBitAddress,
        request: ReadRequest,
    ) -> Result<usize, Self::Error> {
        W::request_from(self, address, request)
    }
}

impl<SCL, SDA, DELAY, E, const N: usize> SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
{
    /// Reset the transaction state and release both lines.
    ///
    /// Fails with [`Error::BusStuck`] if either line still reads low, which
    /// means a device is holding the bus or the pull-ups are missing.
    pub fn begin(&mut self) -> Result<(), Error<E>> {
        self.rx.clear();
        self.rx_index = 0;
        self.pending = None;
        self.transmitting = false;

        self.sda.clear_latch().map_err(Error::Bus)?;
        self.scl.clear_latch().map_err(Error::Bus)?;
        self.set_sda_high()?;
        self.set_scl_high()?;

        if self.sda.is_low().map_err(Error::Bus)? || self.scl.is_low().map_err(Error::Bus)? {
            #[cfg(feature = "defmt")]
            defmt::warn!("i2c: bus held low after release");
            return Err(Error::BusStuck);
        }
        Ok(())
    }

    /// Counterpart of [`begin`](Self::begin). Nothing to release.
    pub fn end(&mut self) {}

    /// Address `address` for writing.
    ///
    /// Uses a repeated start if a transmission is still open. A NAK is
    /// recorded and reported by [`end_transmission`](Self::end_transmission).
    pub fn begin_transmission(&mut self, address: SevenBitAddress) -> Result<(), Error<E>> {
        let byte = address_byte(address, false);
        let acked = if self.transmitting {
            self.raw_repeated_start(byte)?
        } else {
            self.raw_start(byte)?
        };
        self.pending = if acked {
            None
        } else {
            Some(NoAcknowledgeSource::Address)
        };
        self.transmitting = true;
        Ok(())
    }

    /// Write bytes to the open transmission.
    ///
    /// Returns how many were acknowledged. The first NAK is recorded unless
    /// an earlier one already is.
    pub fn transmit(&mut self, data: &[u8]) -> Result<usize, Error<E>> {
        let mut written = 0;
        for &byte in data {
            if self.raw_write_byte(byte)? {
                written += 1;
            } else if self.pending.is_none() {
                self.pending = Some(NoAcknowledgeSource::Data);
            }
        }
        Ok(written)
    }

    /// Close the transmission, reporting any recorded NAK.
    ///
    /// With `stop` unset the bus stays claimed and the next transfer starts
    /// with a repeated start. The recorded NAK is cleared either way.
    pub fn end_transmission(&mut self, stop: bool) -> Result<(), Error<E>> {
        let status = self.pending.take();
        if stop {
            self.raw_stop()?;
            self.transmitting = false;
        }
        match status {
            None => Ok(()),
            Some(source) => Err(Error::NoAck(source)),
        }
    }

    /// Read a block of bytes into the receive buffer.
    ///
    /// Blocks for the whole transfer. Returns the number of bytes now
    /// available: the quantity clamped to the buffer capacity, or `0` if
    /// the register write or the address was not acknowledged. A refused
    /// register write still clocks out and NAKs the data so the device
    /// releases SDA. A zero quantity does not address the device.
    pub fn request_from(
        &mut self,
        address: SevenBitAddress,
        request: ReadRequest,
    ) -> Result<usize, Error<E>> {
        self.pending = None;
        let mut refused = false;

        if let Some(register) = request.register {
            self.begin_transmission(address)?;
            let bytes = register.value.to_be_bytes();
            self.transmit(&bytes[bytes.len() - register.len()..])?;
            match self.end_transmission(false) {
                Ok(()) => {}
                Err(Error::NoAck(_)) => refused = true,
                Err(e) => return Err(e),
            }
        }

        let quantity = request.quantity.min(N);
        self.rx.clear();
        self.rx_index = 0;

        // an addressed slave keeps driving SDA until a byte is NAKed
        if quantity > 0 {
            let byte = address_byte(address, true);
            let acked = if self.transmitting {
                self.raw_repeated_start(byte)?
            } else {
                self.raw_start(byte)?
            };
            self.transmitting = true;

            if acked {
                let last = quantity - 1;
                for count in 0..quantity {
                    let byte = self.raw_read_byte(count == last)?;
                    if !refused {
                        // quantity never exceeds the capacity
                        self.rx.push(byte).ok();
                    }
                }
            } else {
                self.pending = Some(NoAcknowledgeSource::Address);
            }
        }

        if request.stop {
            if self.transmitting {
                self.raw_stop()?;
            }
            self.transmitting = false;
        }

        if refused || self.pending.is_some() {
            #[cfg(feature = "defmt")]
            defmt::debug!("i2c: read from {=u8:#x} refused", address);
            self.rx.clear();
        }
        Ok(self.rx.len())
    }
}

impl<SCL, SDA, DELAY, E, const N: usize> ByteSource for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
{
    fn available(&self) -> usize {
        self.rx.len() - self.rx_index
    }

    fn read(&mut self) -> Option<u8> {
        let value = self.rx.get(self.rx_index).copied();
        if value.is_some() {
            self.rx_index += 1;
        }
        value
    }

    fn peek(&self) -> Option<u8> {
        self.rx.get(self.rx_index).copied()
    }
}

impl<SCL, SDA, DELAY, E, const N: usize> Wire for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
    E: core::fmt::Debug,
{
    type Error = Error<E>;

    fn capacity(&self) -> usize {
        N
    }

    fn begin(&mut self) -> Result<(), Error<E>> {
        SoftI2c::begin(self)
    }

    fn begin_transmission(&mut self, address: SevenBitAddress) -> Result<(), Error<E>> {
        SoftI2c::begin_transmission(self, address)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<usize, Error<E>> {
        SoftI2c::transmit(self, data)
    }

    fn end_transmission(&mut self, stop: bool) -> Result<(), Error<E>> {
        SoftI2c::end_transmission(self, stop)
    }

    fn request_from(
        &mut self,
        address: SevenBitAddress,
        request: ReadRequest,
    ) -> Result<usize, Error<E>> {
        SoftI2c::request_from(self, address, request)
    }
}

// The receive buffer as a byte stream. Reading past the buffered response
// returns `Ok(0)`.
impl<SCL, SDA, DELAY, const N: usize> embedded_io::ErrorType for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin,
    SDA: FlexPin,
    DELAY: DelayNs,
{
    type Error = Infallible;
}

impl<SCL, SDA, DELAY, E, const N: usize> embedded_io::Read for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let pending = &self.rx[self.rx_index..];
        let count = pending.len().min(buf.len());
        buf[..count].copy_from_slice(&pending[..count]);
        self.rx_index += count;
        Ok(count)
    }
}

impl<SCL, SDA, DELAY, E, const N: usize> embedded_io::ReadReady for SoftI2c<SCL, SDA, DELAY, N>
where
    SCL: FlexPin<Error = E>,
    SDA: FlexPin<Error = E>,
    DELAY: DelayNs,
{
    fn read_ready(&mut self) -> Result<bool, Infallible> {
        Ok(self.rx_index < self.rx.len())
    }
}
