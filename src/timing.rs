/// Time-slot parameters of the standard speed bus, in microseconds.
///
/// A write slot starts with the master pulling the line low. A `1` is a short
/// low pulse released well before devices sample (15..60 µs into the slot);
/// a `0` holds the line low for the whole slot. A read slot starts the same
/// way as a `1` and the master samples the line shortly after, while a
/// device sending `0` keeps it low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// Reset low pulse
    pub reset_low: u32,
    /// From releasing the reset pulse to sampling presence
    pub presence_sample: u32,
    /// From sampling presence to the end of the reset sequence
    pub presence_recovery: u32,
    /// Length of a read or write slot
    pub slot: u32,
    /// Low pulse starting a read slot or writing a `1`
    pub slot_start_low: u32,
    /// From slot start to sampling a read slot
    pub read_sample: u32,
    /// Released gap between two slots
    pub recovery: u32,
}

impl Timing {
    pub const STANDARD: Timing = Timing {
        reset_low: 480,
        presence_sample: 60,
        presence_recovery: 420,
        slot: 70,
        slot_start_low: 6,
        read_sample: 15,
        recovery: 1,
    };
}

impl Default for Timing {
    fn default() -> Self {
        Self::STANDARD
    }
}
