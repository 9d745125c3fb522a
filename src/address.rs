use crate::{Driver, Error, IoWire};
use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    ops::{Deref, DerefMut},
    str::FromStr,
};
use embedded_hal::delay::DelayNs;
use log::warn;

/// 64 bit ROM code: family code, 48 bit serial number, CRC8
#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct Address {
    raw: [u8; Self::BYTES as usize],
}

impl Default for Address {
    fn default() -> Self {
        Self::from([0; Self::BYTES as usize])
    }
}

impl From<[u8; Self::BYTES as usize]> for Address {
    fn from(raw: [u8; Self::BYTES as usize]) -> Self {
        Address { raw }
    }
}

impl From<Address> for [u8; Address::BYTES as usize] {
    fn from(addr: Address) -> [u8; Address::BYTES as usize] {
        addr.raw
    }
}

impl Deref for Address {
    type Target = [u8; Self::BYTES as usize];

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl DerefMut for Address {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.raw
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.deref() as _
    }
}

impl AsMut<[u8]> for Address {
    fn as_mut(&mut self) -> &mut [u8] {
        self.deref_mut() as _
    }
}

impl Address {
    /// The length of device address in bytes
    pub const BYTES: u8 = 8;

    pub fn family_code(&self) -> u8 {
        self[0]
    }

    pub fn serial_number(&self) -> [u8; 6] {
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&self[1..7]);
        serial
    }

    /// The CRC8 stored in the last byte
    pub fn crc8(&self) -> u8 {
        self[7]
    }

    pub fn is_crc_valid(&self) -> bool {
        super::check_crc8(self.as_ref())
    }

    pub fn ensure_crc_valid<E: Debug>(&self) -> Result<(), Error<E>> {
        let computed = super::compute_partial_crc8(0, &self[..7]);
        if computed != self.crc8() {
            warn!("rom {} fails crc, computed {:02x}", self, computed);
            Err(Error::CrcMismatch(computed, self.crc8()))
        } else {
            Ok(())
        }
    }
}

/// Error type
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressError {
    NotEnough,
    Invalid,
}

fn hex_to_u8(c: char) -> Option<u8> {
    c.to_digit(16).map(|d| d as u8)
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr = Address::default();
        let mut chars = s.chars().filter(|c| !c.is_whitespace() && *c != ':');

        for i in 0..Self::BYTES as usize {
            match (chars.next(), chars.next()) {
                (Some(h), Some(l)) => match (hex_to_u8(h), hex_to_u8(l)) {
                    (Some(h), Some(l)) => {
                        addr[i] = (h << 4) | l;
                    }
                    _ => return Err(AddressError::Invalid),
                },
                _ => return Err(AddressError::NotEnough),
            }
        }

        if chars.next().is_some() {
            return Err(AddressError::Invalid);
        }

        Ok(addr)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self[0], self[1], self[2], self[3], self[4], self[5], self[6], self[7],
        )
    }
}

impl Address {
    /// Reads the ROM of the only device on the bus and checks its CRC.
    ///
    /// With more than one device present every device answers at once and
    /// the result is the wired-AND of their codes, which the CRC check
    /// usually rejects.
    pub fn get_single<W: IoWire>(
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<Self, Error<W::Error>> {
        let address = driver.read_rom(delay)?;
        address.ensure_crc_valid()?;
        Ok(address)
    }
}

/// How a transaction selects its device after the reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Addressing {
    /// Broadcast. Only valid when exactly one device shares the bus, or when
    /// no data is read back.
    SkipRom,
    /// Only the device with this ROM code responds
    MatchRom(Address),
}

impl From<Address> for Addressing {
    fn from(address: Address) -> Self {
        Addressing::MatchRom(address)
    }
}
