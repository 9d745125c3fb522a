use core::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Error type
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: Sized + Debug> {
    /// Wire not high before reset, the line is probably shorted
    WireFault,
    /// No presence on wire
    NoPresence,
    /// Computed and received CRC8
    CrcMismatch(u8, u8),
    /// Expected and actual family code
    FamilyCodeMismatch(u8, u8),
    /// Conversion did not finish in time
    Timeout,
    PortError(E),
}

impl<E: Sized + Debug> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::PortError(e)
    }
}

impl<E: Sized + Debug> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Error::WireFault => f.write_str("wire held low"),
            Error::NoPresence => f.write_str("no presence pulse"),
            Error::CrcMismatch(computed, received) => write!(
                f,
                "crc mismatch: computed {computed:02x}, received {received:02x}"
            ),
            Error::FamilyCodeMismatch(expected, actual) => write!(
                f,
                "family code mismatch: expected {expected:02x}, found {actual:02x}"
            ),
            Error::Timeout => f.write_str("timed out"),
            Error::PortError(e) => write!(f, "port error: {e:?}"),
        }
    }
}
