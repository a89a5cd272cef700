//! Platform-agnostic modem link for the agrilink field node
//!
//! Everything between the UART and the cloud lives here: the
//! interrupt-fed receive buffer, the AT transaction engine, bring-up of
//! the modem's MQTT session and dispatch of OneNET requests. It has NO
//! hardware dependencies; boards plug in through `agrilink-hal` traits and
//! an `embedded-io-async` transmit half.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

// must come first so the logging macros are visible to every module
mod fmt;

pub mod at;
pub mod cloud;
pub mod config;
pub mod pipeline;
pub mod rx;
pub mod scan;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod sim;

pub use at::{AtEngine, PublishError, TransactionError};
pub use config::{CloudConfig, LinkConfig};
pub use pipeline::{Link, PollEvent};
pub use rx::ReceiveBuffer;
pub use state::DeviceState;
pub use supervisor::{BringupError, LinkStatus};
