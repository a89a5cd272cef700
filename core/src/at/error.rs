//! AT transaction error types

/// Why a single send/await transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionError {
    /// Expected reply never appeared within the timeout
    Timeout,
    /// The modem answered with the `ERROR` marker
    ModemError,
    /// Writing to the UART failed
    Transport,
    /// Formatted command does not fit the command buffer
    CommandTooLong,
}

impl core::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timed out waiting for modem reply"),
            Self::ModemError => write!(f, "Modem replied ERROR"),
            Self::Transport => write!(f, "UART write failed"),
            Self::CommandTooLong => write!(f, "AT command too long"),
        }
    }
}

impl core::error::Error for TransactionError {}

/// Why a publish failed
///
/// Prompt-mode publishes are two transactions. Which half failed matters
/// when debugging the modem, so the two are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// The publish command was rejected, or the `>` prompt never arrived
    Command(TransactionError),
    /// Prompt arrived and the payload was sent, but no confirmation followed
    Confirm(TransactionError),
    /// Topic or payload did not fit its buffer
    Format,
}

impl core::fmt::Display for PublishError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Command(e) => write!(f, "Publish command failed: {}", e),
            Self::Confirm(e) => write!(f, "Publish not confirmed: {}", e),
            Self::Format => write!(f, "Publish payload too large"),
        }
    }
}

impl core::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Command(e) | Self::Confirm(e) => Some(e),
            Self::Format => None,
        }
    }
}
