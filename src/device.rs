use crate::{Address, Addressing, Driver, Error, IoWire};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;

/// Generic device interface
pub trait Device: Sized {
    /// Device family code
    const FAMILY_CODE: u8;

    /// How transactions select this device
    fn addressing(&self) -> &Addressing;

    /// Instantiate device using address without checking the family code
    fn from_address_unchecked(address: Address) -> Self;

    /// Instantiate device from address
    fn from_address<E: Sized + Debug>(address: Address) -> Result<Self, Error<E>> {
        if address.family_code() != Self::FAMILY_CODE {
            Err(Error::FamilyCodeMismatch(
                Self::FAMILY_CODE,
                address.family_code(),
            ))
        } else {
            Ok(Self::from_address_unchecked(address))
        }
    }

    /// Reads the ROM of the only device on the bus
    fn get_single<W: IoWire>(
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<Self, Error<W::Error>> {
        let address = Address::get_single(driver, delay)?;
        Self::from_address(address)
    }
}
