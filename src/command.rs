pub trait OpCode {
    fn op_code(&self) -> u8;
}

/// ROM function commands, valid right after a reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    MatchRom = 0x55,
    SearchRom = 0xF0,
    /// Search restricted to devices with an alarm flag set
    SearchRomAlarmed = 0xEC,
    SkipRom = 0xCC,
    ReadRom = 0x33,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as _
    }
}
