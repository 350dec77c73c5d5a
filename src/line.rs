//! Open-drain line control
//!
//! I2C lines are never driven high. A line is either pulled low by switching
//! its pin to output (with the output latch at low), or released by switching
//! the pin to input and letting a pull-up resistor raise it.
//!
//! Every transition runs inside a critical section so that an interrupt
//! cannot stretch the setup or hold time of a bit.

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

/// Pull resistor applied while a line is released
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    /// Floating input, the bus relies on external pull-ups
    #[default]
    None,
    /// Internal pull-up enabled while released
    Up,
}

/// A GPIO pin whose direction can be switched at runtime.
///
/// This is the capability the open-drain emulation needs from the platform:
/// an output latch, a direction switch and an input sampler.
pub trait FlexPin: ErrorType {
    /// Write logic low to the output latch without changing direction.
    fn set_low(&mut self) -> Result<(), Self::Error>;

    /// Switch to output, driving the latched level.
    fn set_as_output(&mut self) -> Result<(), Self::Error>;

    /// Switch to input with the given pull configuration.
    fn set_as_input(&mut self, pull: Pull) -> Result<(), Self::Error>;

    /// Sample the pin level.
    fn is_high(&mut self) -> Result<bool, Self::Error>;
}

/// Adapter for pins already configured as open-drain outputs.
///
/// Driving such a pin high releases the line, so "output" maps to
/// `set_low` and "input" maps to `set_high`. The latch write is a no-op.
pub struct OpenDrain<P> {
    pin: P,
}

impl<P> OpenDrain<P>
where
    P: OutputPin + InputPin,
{
    /// Wrap an open-drain pin
    pub fn new(pin: P) -> Self {
        OpenDrain { pin }
    }

    /// Return the wrapped pin
    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: ErrorType> ErrorType for OpenDrain<P> {
    type Error = P::Error;
}

impl<P> FlexPin for OpenDrain<P>
where
    P: OutputPin + InputPin,
{
    #[inline]
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    #[inline]
    fn set_as_output(&mut self) -> Result<(), Self::Error> {
        self.pin.set_low()
    }

    #[inline]
    fn set_as_input(&mut self, _pull: Pull) -> Result<(), Self::Error> {
        self.pin.set_high()
    }

    #[inline]
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.pin.is_high()
    }
}

/// One bus line (SDA or SCL) with open-drain semantics.
pub struct Line<P> {
    pin: P,
    pull: Pull,
}

impl<P: FlexPin> Line<P> {
    /// Create a line. The pin is not touched until the first transition.
    pub fn new(pin: P, pull: Pull) -> Self {
        Line { pin, pull }
    }

    /// Pull the line low.
    ///
    /// With the internal pull-up enabled the latch may read back high after
    /// the input phase, so it is cleared before the direction switch.
    pub fn set_low(&mut self) -> Result<(), P::Error> {
        let pull = self.pull;
        let pin = &mut self.pin;
        critical_section::with(|_| {
            if pull == Pull::Up {
                pin.set_low()?;
            }
            pin.set_as_output()
        })
    }

    /// Release the line and let the pull-up raise it.
    pub fn set_high(&mut self) -> Result<(), P::Error> {
        let pull = self.pull;
        let pin = &mut self.pin;
        critical_section::with(|_| pin.set_as_input(pull))
    }

    /// Clear the output latch. Used once at bus init so later
    /// output switches always drive low.
    pub fn clear_latch(&mut self) -> Result<(), P::Error> {
        self.pin.set_low()
    }

    #[inline]
    pub fn is_high(&mut self) -> Result<bool, P::Error> {
        self.pin.is_high()
    }

    #[inline]
    pub fn is_low(&mut self) -> Result<bool, P::Error> {
        self.pin.is_high().map(|high| !high)
    }

    /// Return the underlying pin
    pub fn into_inner(self) -> P {
        self.pin
    }
}
