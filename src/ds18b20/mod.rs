//! DS18B20 digital thermometer.
//!
//! Every operation is one transaction: reset, ROM selection, function
//! command, then data. A transaction that finds no presence pulse fails with
//! [`Error::NoPresence`] before sending anything else. Retry failed
//! operations as a whole, there is no way to resume one halfway.

use embedded_hal::delay::DelayNs;
use log::warn;

use crate::{Address, Addressing, Device, Driver, Error, IoWire, OpCode, Sensor};

mod scratchpad;
mod temperature;

pub use scratchpad::Scratchpad;
pub use temperature::{split_temp, Temperature};

/// Family code shared by all DS18B20
pub const FAMILY_CODE: u8 = 0x28;

/// Time the device needs to commit the scratchpad to its EEPROM
pub const COPY_SCRATCHPAD_MS: u32 = 10;

const CONVERSION_POLL_MS: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Convert = 0x44,
    WriteScratchpad = 0x4e,
    ReadScratchpad = 0xBE,
    CopyScratchpad = 0x48,
    RecallE2 = 0xB8,
    ReadPowerSupply = 0xB4,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as _
    }
}

/// Conversion resolution, as encoded in the configuration register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MeasureResolution {
    /// 9 bit, 0.5 °C
    TC8 = 0b0001_1111,
    /// 10 bit, 0.25 °C
    TC4 = 0b0011_1111,
    /// 11 bit, 0.125 °C
    TC2 = 0b0101_1111,
    /// 12 bit, 0.0625 °C
    #[default]
    TC = 0b0111_1111,
}

impl MeasureResolution {
    /// Maximum conversion time
    pub fn time_ms(&self) -> u16 {
        match self {
            MeasureResolution::TC8 => 94,
            MeasureResolution::TC4 => 188,
            MeasureResolution::TC2 => 375,
            MeasureResolution::TC => 750,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            MeasureResolution::TC8 => 9,
            MeasureResolution::TC4 => 10,
            MeasureResolution::TC2 => 11,
            MeasureResolution::TC => 12,
        }
    }

    /// Configuration register value selecting this resolution
    pub fn config(&self) -> u8 {
        *self as _
    }

    /// Decodes R1 and R0, bits 6 and 5 of the configuration register
    pub fn from_config(config: u8) -> Self {
        match (config >> 5) & 0b11 {
            0b00 => MeasureResolution::TC8,
            0b01 => MeasureResolution::TC4,
            0b10 => MeasureResolution::TC2,
            _ => MeasureResolution::TC,
        }
    }

    /// Temperature register bits holding defined data
    pub fn mask(&self) -> u16 {
        !0u16 << (12 - self.bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSupply {
    /// Powered through VDD
    External,
    /// Powered from the data line
    Parasite,
}

/// Alarm thresholds and resolution, bytes 2 to 4 of the scratchpad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// TH, whole °C
    pub alarm_high: i8,
    /// TL, whole °C
    pub alarm_low: i8,
    pub resolution: MeasureResolution,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            alarm_high: 125,
            alarm_low: -55,
            resolution: MeasureResolution::TC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ds18b20 {
    addressing: Addressing,
    resolution: MeasureResolution,
    power_supply: Option<PowerSupply>,
}

impl From<Ds18b20> for Addressing {
    fn from(device: Ds18b20) -> Self {
        device.addressing
    }
}

impl Ds18b20 {
    /// The only device on the bus, selected with Skip ROM.
    ///
    /// Reading data back from more than one device this way yields the
    /// wired-AND of all answers.
    pub fn single() -> Self {
        Self::with_addressing(Addressing::SkipRom)
    }

    /// The device with this ROM code, selected with Match ROM. See
    /// [`Device::from_address`] for a family code check.
    pub fn at(address: Address) -> Self {
        Self::with_addressing(Addressing::MatchRom(address))
    }

    pub fn with_addressing(addressing: Addressing) -> Self {
        Ds18b20 {
            addressing,
            resolution: MeasureResolution::TC,
            power_supply: None,
        }
    }

    /// Sets the resolution the device is known to be configured for, which
    /// only affects waiting for conversions.
    pub fn with_resolution(mut self, resolution: MeasureResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn resolution(&self) -> MeasureResolution {
        self.resolution
    }

    /// Sets how the device is powered, sparing [`Ds18b20::measure`] from
    /// asking the device each time.
    pub fn with_power_supply(mut self, power_supply: PowerSupply) -> Self {
        self.power_supply = Some(power_supply);
        self
    }

    pub fn power_supply(&self) -> Option<PowerSupply> {
        self.power_supply
    }

    /// Triggers Convert T. The scratchpad holds the new value after at most
    /// the returned resolution's [`MeasureResolution::time_ms`].
    pub fn start_conversion<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<MeasureResolution, Error<W::Error>> {
        driver.reset_address_write_only(delay, &self.addressing, &[Command::Convert.op_code()])?;
        Ok(self.resolution)
    }

    /// Issues a read slot, answered with `1` once the conversion started by
    /// the directly preceding [`Ds18b20::start_conversion`] is done.
    ///
    /// Parasite powered devices cannot answer and always read `1`, wait the
    /// conversion time instead or use [`Ds18b20::measure`].
    pub fn conversion_done<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<bool, Error<W::Error>> {
        Ok(driver.read_bit(delay)?)
    }

    /// Polls [`Ds18b20::conversion_done`] and sleeps in between. Only
    /// meaningful for externally powered devices.
    ///
    /// `sleep` should yield to other tasks; it never runs inside a critical
    /// section. Gives up with [`Error::Timeout`] once the maximum conversion
    /// time has passed.
    pub fn wait_for_conversion<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
        sleep: &mut impl DelayNs,
    ) -> Result<(), Error<W::Error>> {
        let limit = u32::from(self.resolution.time_ms());
        let mut waited = 0;
        while !self.conversion_done(driver, delay)? {
            if waited >= limit {
                warn!("conversion not done after {} ms", waited);
                return Err(Error::Timeout);
            }
            sleep.delay_ms(CONVERSION_POLL_MS);
            waited += CONVERSION_POLL_MS;
        }
        Ok(())
    }

    /// Converts, waits for the result and reads it back.
    ///
    /// Externally powered devices are polled. For parasite powered devices
    /// the full conversion time is slept, as their read slots float high.
    /// Unless set with [`Ds18b20::with_power_supply`], the power mode is read
    /// from the device first.
    pub fn measure<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
        sleep: &mut impl DelayNs,
    ) -> Result<Temperature, Error<W::Error>> {
        let power_supply = match self.power_supply {
            Some(power_supply) => power_supply,
            None => self.read_power_supply(driver, delay)?,
        };
        let resolution = self.start_conversion(driver, delay)?;
        match power_supply {
            PowerSupply::External => self.wait_for_conversion(driver, delay, sleep)?,
            PowerSupply::Parasite => sleep.delay_ms(u32::from(resolution.time_ms())),
        }
        self.read_temperature(driver, delay)
    }

    pub fn write_scratchpad<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
        alarm_high: i8,
        alarm_low: i8,
        config: u8,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_address_write_only(
            delay,
            &self.addressing,
            &[
                Command::WriteScratchpad.op_code(),
                alarm_high as u8,
                alarm_low as u8,
                config,
            ],
        )
    }

    /// Reads all nine bytes without looking at the CRC.
    pub fn read_scratchpad_raw<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
        scratchpad: &mut [u8; Scratchpad::BYTES],
    ) -> Result<(), Error<W::Error>> {
        driver.reset_address_write_read(
            delay,
            &self.addressing,
            &[Command::ReadScratchpad.op_code()],
            &mut scratchpad[..],
        )
    }

    /// Reads all nine bytes and checks the CRC.
    pub fn read_scratchpad<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<Scratchpad, Error<W::Error>> {
        let mut raw = [0u8; Scratchpad::BYTES];
        self.read_scratchpad_raw(driver, delay, &mut raw)?;
        Scratchpad::from_bytes(raw)
    }

    /// Persists TH, TL and configuration, then sleeps while the device
    /// writes its EEPROM.
    pub fn copy_scratchpad<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
        sleep: &mut impl DelayNs,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_address_write_only(
            delay,
            &self.addressing,
            &[Command::CopyScratchpad.op_code()],
        )?;
        sleep.delay_ms(COPY_SCRATCHPAD_MS);
        Ok(())
    }

    /// Reloads TH, TL and configuration from EEPROM.
    pub fn recall_eeprom<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_address_write_only(delay, &self.addressing, &[Command::RecallE2.op_code()])
    }

    pub fn read_power_supply<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<PowerSupply, Error<W::Error>> {
        driver.reset_address_write_only(
            delay,
            &self.addressing,
            &[Command::ReadPowerSupply.op_code()],
        )?;
        if driver.read_bit(delay)? {
            Ok(PowerSupply::External)
        } else {
            Ok(PowerSupply::Parasite)
        }
    }

    pub fn read_temperature<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<Temperature, Error<W::Error>> {
        Ok(self.read_scratchpad(driver, delay)?.temperature())
    }

    /// Writes thresholds and resolution to the scratchpad. They are lost on
    /// power loss unless followed by [`Ds18b20::copy_scratchpad`].
    pub fn configure<W: IoWire>(
        &mut self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
        config: &Config,
    ) -> Result<(), Error<W::Error>> {
        self.write_scratchpad(
            driver,
            delay,
            config.alarm_high,
            config.alarm_low,
            config.resolution.config(),
        )?;
        self.resolution = config.resolution;
        Ok(())
    }

    pub fn read_config<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<Config, Error<W::Error>> {
        Ok(self.read_scratchpad(driver, delay)?.config())
    }
}

impl Device for Ds18b20 {
    const FAMILY_CODE: u8 = FAMILY_CODE;

    fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    fn from_address_unchecked(address: Address) -> Self {
        Self::at(address)
    }
}

impl Sensor for Ds18b20 {
    fn start_measurement<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<u16, Error<W::Error>> {
        Ok(self.start_conversion(driver, delay)?.time_ms())
    }

    fn read_measurement<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<f32, Error<W::Error>> {
        self.read_temperature(driver, delay).map(|t| t.celsius())
    }

    fn read_measurement_raw<W: IoWire>(
        &self,
        driver: &mut Driver<W>,
        delay: &mut impl DelayNs,
    ) -> Result<i16, Error<W::Error>> {
        self.read_temperature(driver, delay).map(|t| t.raw())
    }
}
