use core::fmt;

/// Failure reported by a link collaborator for a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkFault {
    /// No reply within the link's own deadline.
    Timeout,
    /// Reply failed its integrity check, or the coprocessor saw a corrupt request.
    Corrupt,
    /// The coprocessor answered with an error code.
    Rejected,
    /// Fewer registers moved than were requested.
    ShortTransfer,
}

/// Step of the in-air restart handshake that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryStage {
    /// No arming-state update arrived.
    ArmingFeed,
    /// Flight termination never showed up as force_failsafe.
    FlightTermination,
    /// The arm request never showed up as armed.
    Arm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Transaction larger than the coprocessor's transfer limit. Never sent.
    TooManyRegisters { count: usize, limit: usize },
    Link(LinkFault),
    ProtocolMismatch { found: u16 },
    /// Coprocessor advertised counts outside sane bounds.
    ConfigOutOfRange,
    RecoveryTimeout(RecoveryStage),
    InvalidArgument,
    /// More values than the coprocessor has actuators.
    TooManyChannels,
    /// Operation refused while the safety switch is off.
    SafetyOff,
    CrcMismatch { expected: u32, found: u32 },
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<LinkFault> for Error {
    fn from(fault: LinkFault) -> Self {
        Error::Link(fault)
    }
}

impl fmt::Display for LinkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFault::Timeout => write!(f, "timeout"),
            LinkFault::Corrupt => write!(f, "corrupt packet"),
            LinkFault::Rejected => write!(f, "rejected by coprocessor"),
            LinkFault::ShortTransfer => write!(f, "short transfer"),
        }
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStage::ArmingFeed => write!(f, "waiting for arming state"),
            RecoveryStage::FlightTermination => write!(f, "flight termination"),
            RecoveryStage::Arm => write!(f, "re-arming"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooManyRegisters { count, limit } => {
                write!(f, "{} registers exceed the {} byte transfer limit", count, limit)
            }
            Error::Link(fault) => write!(f, "link error: {}", fault),
            Error::ProtocolMismatch { found } => {
                write!(f, "coprocessor speaks protocol {}", found)
            }
            Error::ConfigOutOfRange => write!(f, "coprocessor config out of range"),
            Error::RecoveryTimeout(stage) => write!(f, "in-air recovery timed out ({})", stage),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::TooManyChannels => write!(f, "more values than actuators"),
            Error::SafetyOff => write!(f, "refused while safety is off"),
            Error::CrcMismatch { expected, found } => {
                write!(f, "firmware CRC {:#010x}, expected {:#010x}", found, expected)
            }
        }
    }
}
