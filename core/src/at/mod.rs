//! AT command transport: reply matching, the transaction engine and its errors

pub mod engine;
pub mod error;
pub mod wait;

pub use engine::{AtEngine, Command, CMD_CAPACITY, PROMPT, PROMPT_PUBLISH_CONFIRM, QUOTED_PUBLISH_OK};
pub use error::{PublishError, TransactionError};
pub use wait::{Wait, WaitState};
