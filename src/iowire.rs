use embedded_hal::digital::{Error, ErrorType, InputPin, OutputPin};

/// The open-drain data line of a 1-Wire bus.
///
/// The line idles high through a pull-up. The master and devices only ever
/// pull it low; nobody drives it high.
pub trait IoWire {
    type Error: Error;

    /// Pulls the line low.
    fn drive_low(&mut self) -> Result<(), Self::Error>;

    /// Stops driving the line, letting the pull-up take it high unless a
    /// device holds it low.
    fn release(&mut self) -> Result<(), Self::Error>;

    /// Samples the line level.
    fn is_high(&mut self) -> Result<bool, Self::Error>;

    /// Samples the line level.
    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Single open-drain pin
///
/// *NOTE* the pin must be configured as open-drain (or emulate it by
/// switching to input on `set_high`), otherwise releasing the line drives it
/// high against the devices.
impl<IO> IoWire for (IO,)
where
    IO: ErrorType + OutputPin + InputPin,
{
    type Error = IO::Error;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_low()
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.0.set_high()
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.0.is_high()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.0.is_low()
    }
}

/// Split sense and drive pins, e.g. an input pin plus a transistor pulling
/// the line low while the output is low
impl<E, I, O> IoWire for (I, O)
where
    E: Error,
    I: ErrorType<Error = E> + InputPin,
    O: ErrorType<Error = E> + OutputPin,
{
    type Error = E;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        self.1.set_low()
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.1.set_high()
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.0.is_high()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.0.is_low()
    }
}
