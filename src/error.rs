use core::fmt;

use embedded_hal::digital::ErrorKind;

/// Digital line between the MCU and the EM4095
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    /// SHD, shutdown input of the chip
    Shd,
    /// MOD, carrier modulation input of the chip
    Mod,
    /// DEMOD_OUT, demodulated data output of the chip
    Demod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Reading or driving one of the GPIO lines failed
    Gpio { line: Line, kind: ErrorKind },
    /// The timestamp source failed
    Clock,
    /// The clock divider can't be 0
    InvalidDivider,
    /// Transfer length outside of `1..=max`
    InvalidLength { len: usize, max: usize },
    /// Output buffer can't hold the decoded samples
    BufferTooSmall { required: usize },
    /// No driver in the shared slot
    NotInitialized,
    /// The transfer didn't complete in time
    Timeout,
    /// A read completed with a different number of samples than requested
    LengthMismatch { expected: usize, actual: usize },
}

impl Error {
    pub(crate) fn gpio<E: embedded_hal::digital::Error>(line: Line, err: E) -> Self {
        Self::Gpio {
            line,
            kind: err.kind(),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Line::Shd => "shd",
            Line::Mod => "mod",
            Line::Demod => "demod",
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Gpio { line, kind } => write!(f, "{line} gpio failed: {kind}"),
            Error::Clock => f.write_str("timestamp read failed"),
            Error::InvalidDivider => f.write_str("div can't be 0"),
            Error::InvalidLength { len, max } => {
                write!(f, "invalid length {len}, must be between 1 and {max}")
            }
            Error::BufferTooSmall { required } => {
                write!(f, "buffer too small, {required} bytes required")
            }
            Error::NotInitialized => f.write_str("driver not initialized"),
            Error::Timeout => f.write_str("transfer timed out"),
            Error::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} samples, got {actual}")
            }
        }
    }
}

impl core::error::Error for Error {}
