//! Bitbanged I2C master and FRN20 flow sensor driver
//!
//! - [`line`]: open-drain line emulation on switchable GPIO pins
//! - [`i2c`]: bit-level master, also usable through [`embedded_hal::i2c::I2c`]
//! - [`wire`]: buffered transaction layer with a receive buffer
//! - [`frn20`]: register client and device session for the FRN20 sensor
//! - [`frame`] and [`crc`]: response frame decoding and validation
//!
//! ```ignore
//!   use frn20_softi2c::{frn20::Frn20, BusConfig, OpenDrain, SoftI2c};
//!
//!   let mut i2c = SoftI2c::new(OpenDrain::new(scl), OpenDrain::new(sda), delay, BusConfig::default());
//!   i2c.begin()?;
//!
//!   let mut sensor = Frn20::new(&mut i2c, timer);
//!   let params = sensor.begin()?;
//!   let flow = sensor.read_mass_flow()?;
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

pub mod crc;
pub mod frame;
pub mod frn20;
pub mod i2c;
pub mod line;
pub mod wire;

#[cfg(test)]
mod testing;

pub use frame::{FrameError, Params, Unit};
pub use frn20::Frn20;
pub use i2c::{BusConfig, SoftI2c};
pub use line::{FlexPin, OpenDrain, Pull};
pub use wire::{ByteSource, ReadRequest, Wire};
