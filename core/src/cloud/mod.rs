//! OneNET cloud messaging over the modem's MQTT session
//!
//! Inbound notifications are classified by topic substring
//! ([`message`]), acted on by the [`dispatch::Dispatcher`], and answered
//! through [`reply`]. Outbound telemetry bodies come from [`telemetry`].

pub mod dispatch;
pub mod message;
pub mod reply;
pub mod telemetry;
pub mod topics;

pub use dispatch::{DispatchError, DispatchOutcome, Dispatcher};
pub use message::{classify, records, IncomingMessage, MessageClass, Record};
pub use reply::{Delivery, ReplyBody, ReplyRequest};
pub use telemetry::Telemetry;
pub use topics::{TopicBuf, Topics};

/// Errors building cloud topics and bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloudError {
    /// Identifier contains `+`, `#`, NUL or a path separator
    InvalidTopic,
    /// Topic exceeds the topic buffer
    TopicTooLong,
    /// JSON body exceeds the body buffer
    BodyTooLong,
}

impl core::fmt::Display for CloudError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidTopic => write!(f, "Invalid MQTT topic characters"),
            Self::TopicTooLong => write!(f, "Topic too long"),
            Self::BodyTooLong => write!(f, "JSON body too long"),
        }
    }
}

impl core::error::Error for CloudError {}
