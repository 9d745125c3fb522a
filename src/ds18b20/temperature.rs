use super::MeasureResolution;
use byteorder::{ByteOrder, LittleEndian};
use core::fmt::{Display, Formatter, Result as FmtResult};

/// Temperature register value in 1/16 °C
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature(i16);

impl Temperature {
    /// Register content after power-up, before the first conversion
    pub const POWER_ON: Temperature = Temperature(0x0550);

    pub fn from_raw(raw: i16) -> Self {
        Temperature(raw)
    }

    /// Decodes the LSB, MSB pair at the start of the scratchpad
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Temperature(LittleEndian::read_i16(&bytes))
    }

    pub fn raw(&self) -> i16 {
        self.0
    }

    pub fn celsius(&self) -> f32 {
        self.0 as f32 / 16_f32
    }

    /// See [`split_temp`]
    pub fn split(&self) -> (i16, i16) {
        split_temp(self.0 as u16)
    }

    /// Clears the low bits the device leaves undefined below 12 bit
    /// resolution.
    pub fn masked(self, resolution: MeasureResolution) -> Self {
        Temperature((self.0 as u16 & resolution.mask()) as i16)
    }
}

impl Display for Temperature {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:04} °C", sign, abs >> 4, (abs & 0xF) * 625)
    }
}

/// Split raw u16 value to two parts: integer and fraction N
/// The value is integer + fraction/10000
pub fn split_temp(temperature: u16) -> (i16, i16) {
    if temperature < 0x8000 {
        (temperature as i16 >> 4, (temperature as i16 & 0xF) * 625)
    } else {
        let abs = (temperature as i16).wrapping_neg();
        (-(abs >> 4), -625 * (abs & 0xF))
    }
}
