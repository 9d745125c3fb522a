use super::{Config, MeasureResolution, Temperature};
use crate::Error;
use core::fmt::Debug;
use log::warn;

/// The nine scratchpad bytes: temperature LSB and MSB, TH, TL,
/// configuration, three reserved bytes and the CRC8 of the first eight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Scratchpad {
    raw: [u8; Self::BYTES],
}

impl Scratchpad {
    pub const BYTES: usize = 9;

    /// Accepts the bytes only if the trailing CRC matches.
    pub fn from_bytes<E: Debug>(raw: [u8; Self::BYTES]) -> Result<Self, Error<E>> {
        let scratchpad = Self::from_bytes_unchecked(raw);
        let computed = crate::compute_partial_crc8(0, &raw[..8]);
        if computed != scratchpad.crc8() {
            warn!("scratchpad fails crc, computed {:02x}", computed);
            Err(Error::CrcMismatch(computed, scratchpad.crc8()))
        } else {
            Ok(scratchpad)
        }
    }

    pub fn from_bytes_unchecked(raw: [u8; Self::BYTES]) -> Self {
        Scratchpad { raw }
    }

    pub fn as_bytes(&self) -> &[u8; Self::BYTES] {
        &self.raw
    }

    /// Last conversion result, undefined low bits cleared
    pub fn temperature(&self) -> Temperature {
        Temperature::from_le_bytes([self.raw[0], self.raw[1]]).masked(self.resolution())
    }

    pub fn alarm_high(&self) -> i8 {
        self.raw[2] as i8
    }

    pub fn alarm_low(&self) -> i8 {
        self.raw[3] as i8
    }

    pub fn config_register(&self) -> u8 {
        self.raw[4]
    }

    pub fn resolution(&self) -> MeasureResolution {
        MeasureResolution::from_config(self.config_register())
    }

    pub fn config(&self) -> Config {
        Config {
            alarm_high: self.alarm_high(),
            alarm_low: self.alarm_low(),
            resolution: self.resolution(),
        }
    }

    pub fn crc8(&self) -> u8 {
        self.raw[8]
    }

    pub fn is_crc_valid(&self) -> bool {
        crate::check_crc8(&self.raw)
    }
}

impl AsRef<[u8]> for Scratchpad {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}
