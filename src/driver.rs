use crate::{Address, Addressing, Command, Error, IoWire, OpCode, Timing};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};

/// Level the master leaves the line at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Not driven, pulled high unless a device pulls it low
    Released,
    DrivenLow,
}

/// Bus master bit-banging one 1-Wire line.
///
/// Each physical bus needs its own driver. Borrowing the driver mutably for
/// every transfer keeps two transactions from interleaving on the same line.
pub struct Driver<W: IoWire> {
    io_wire: W,
    state: BusState,
    timing: Timing,
}

impl<E: Debug, W: IoWire<Error = E>> Driver<W> {
    /// Takes over the line and releases it.
    pub fn new(io_wire: W) -> Result<Self, Error<E>> {
        Self::with_timing(io_wire, Timing::STANDARD)
    }

    pub fn with_timing(io_wire: W, timing: Timing) -> Result<Self, Error<E>> {
        let mut driver = Driver {
            io_wire,
            state: BusState::DrivenLow,
            timing,
        };
        driver.release()?;
        Ok(driver)
    }

    /// Gives the line back, e.g. to rebind the driver to another pin.
    pub fn release_wire(self) -> W {
        self.io_wire
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn reset_write_read(
        &mut self,
        delay: &mut impl DelayNs,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.write_bytes(delay, write)?;
        self.read_bytes(delay, read)?;
        Ok(())
    }

    pub fn reset_write_only(
        &mut self,
        delay: &mut impl DelayNs,
        write: &[u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.write_bytes(delay, write)?;
        Ok(())
    }

    pub fn reset_address_write_read(
        &mut self,
        delay: &mut impl DelayNs,
        addressing: &Addressing,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<E>> {
        self.address(delay, addressing)?;
        self.write_bytes(delay, write)?;
        self.read_bytes(delay, read)?;
        Ok(())
    }

    pub fn reset_address_write_only(
        &mut self,
        delay: &mut impl DelayNs,
        addressing: &Addressing,
        write: &[u8],
    ) -> Result<(), Error<E>> {
        self.address(delay, addressing)?;
        self.write_bytes(delay, write)?;
        Ok(())
    }

    /// Resets the bus and selects the device(s) the next function command
    /// is meant for.
    pub fn address(
        &mut self,
        delay: &mut impl DelayNs,
        addressing: &Addressing,
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        match addressing {
            Addressing::SkipRom => self.skip(delay)?,
            Addressing::MatchRom(addr) => self.select(delay, addr)?,
        }
        Ok(())
    }

    /// Reads the ROM code of the only device on the bus. The CRC is not
    /// checked, see [`Address::get_single`].
    pub fn read_rom(&mut self, delay: &mut impl DelayNs) -> Result<Address, Error<E>> {
        let mut address = Address::default();
        self.reset_write_read(delay, &[Command::ReadRom.op_code()], address.as_mut())?;
        Ok(address)
    }

    pub fn match_rom(&mut self, delay: &mut impl DelayNs, addr: &Address) -> Result<(), Error<E>> {
        self.address(delay, &Addressing::MatchRom(*addr))
    }

    pub fn skip_rom(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.address(delay, &Addressing::SkipRom)
    }

    /// Starts a search over all devices. The bus is left right after the
    /// command byte; walking the ROM bits is up to the caller.
    pub fn search_rom(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.reset_write_only(delay, &[Command::SearchRom.op_code()])
    }

    /// Like [`Driver::search_rom`], but only devices whose last conversion
    /// crossed their alarm thresholds take part.
    pub fn alarm_search(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.reset_write_only(delay, &[Command::SearchRomAlarmed.op_code()])
    }

    pub fn skip(&mut self, delay: &mut impl DelayNs) -> Result<(), E> {
        trace!("skip rom");
        self.write_command(delay, Command::SkipRom)
    }

    pub fn select(&mut self, delay: &mut impl DelayNs, addr: &Address) -> Result<(), E> {
        trace!("match rom {}", addr);
        self.write_command(delay, Command::MatchRom)?;
        self.write_bytes(delay, addr.as_ref())
    }

    /// Performs a reset and listens for a presence pulse
    /// Returns Err(NoPresence) if no device answered
    pub fn reset(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        if self.reset_pulse(delay)? {
            Ok(())
        } else {
            Err(Error::NoPresence)
        }
    }

    /// Performs a reset and listens for a presence pulse
    /// Returns Err(WireFault) if the wire seems to be shortened,
    /// Ok(true) if presence pulse has been received and Ok(false)
    /// if no other device was detected but the wire seems to be ok
    pub fn reset_pulse(&mut self, delay: &mut impl DelayNs) -> Result<bool, Error<E>> {
        self.ensure_wire_high(delay)?;

        let timing = self.timing;
        let presence = critical_section::with(|_| -> Result<bool, E> {
            self.drive_low()?;
            delay.delay_us(timing.reset_low);
            self.release()?;
            delay.delay_us(timing.presence_sample);
            let presence = self.is_low()?;
            delay.delay_us(timing.presence_recovery);
            Ok(presence)
        })?;

        if !presence {
            debug!("no presence pulse");
        }
        Ok(presence)
    }

    fn ensure_wire_high(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        for _ in 0..125 {
            if critical_section::with(|_| self.is_high())? {
                return Ok(());
            }
            delay.delay_us(2);
        }
        warn!("wire held low");
        Err(Error::WireFault)
    }

    pub fn read_bytes(&mut self, delay: &mut impl DelayNs, dst: &mut [u8]) -> Result<(), E> {
        for d in dst {
            *d = self.read_byte(delay)?;
        }
        Ok(())
    }

    /// Least significant bit first
    pub fn read_byte(&mut self, delay: &mut impl DelayNs) -> Result<u8, E> {
        let mut byte = 0_u8;
        for _ in 0..8 {
            byte >>= 1;
            if self.read_bit(delay)? {
                byte |= 0x80;
            }
        }
        Ok(byte)
    }

    pub fn read_bit(&mut self, delay: &mut impl DelayNs) -> Result<bool, E> {
        let timing = self.timing;
        critical_section::with(|_| -> Result<bool, E> {
            self.drive_low()?;
            delay.delay_us(timing.slot_start_low);
            self.release()?;
            delay.delay_us(timing.read_sample.saturating_sub(timing.slot_start_low));
            let bit = self.is_high()?;
            delay.delay_us(timing.slot.saturating_sub(timing.read_sample) + timing.recovery);
            Ok(bit)
        })
    }

    pub fn write_command(&mut self, delay: &mut impl DelayNs, cmd: impl OpCode) -> Result<(), E> {
        self.write_byte(delay, cmd.op_code())
    }

    pub fn write_bytes(&mut self, delay: &mut impl DelayNs, bytes: &[u8]) -> Result<(), E> {
        for b in bytes {
            self.write_byte(delay, *b)?;
        }
        Ok(())
    }

    /// Least significant bit first
    pub fn write_byte(&mut self, delay: &mut impl DelayNs, byte: u8) -> Result<(), E> {
        let mut byte = byte;
        for _ in 0..8 {
            self.write_bit(delay, (byte & 0x01) == 0x01)?;
            byte >>= 1;
        }
        Ok(())
    }

    pub fn write_bit(&mut self, delay: &mut impl DelayNs, high: bool) -> Result<(), E> {
        let timing = self.timing;
        critical_section::with(|_| -> Result<(), E> {
            self.drive_low()?;
            if high {
                delay.delay_us(timing.slot_start_low);
                self.release()?;
                delay.delay_us(timing.slot.saturating_sub(timing.slot_start_low));
            } else {
                delay.delay_us(timing.slot);
                self.release()?;
            }
            delay.delay_us(timing.recovery);
            Ok(())
        })
    }

    #[inline(always)]
    pub fn drive_low(&mut self) -> Result<(), E> {
        self.io_wire.drive_low()?;
        self.state = BusState::DrivenLow;
        Ok(())
    }

    #[inline(always)]
    pub fn release(&mut self) -> Result<(), E> {
        self.io_wire.release()?;
        self.state = BusState::Released;
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn is_high(&mut self) -> Result<bool, E> {
        self.io_wire.is_high()
    }

    #[inline(always)]
    pub(crate) fn is_low(&mut self) -> Result<bool, E> {
        self.io_wire.is_low()
    }
}
