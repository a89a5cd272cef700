//! Node provisioning
//!
//! Credentials come from the OneNET console for this device. Replace the
//! placeholders before flashing.

use agrilink_core::config::{BringupPolicy, PublishMode};
use agrilink_core::{CloudConfig, LinkConfig};

pub const PRODUCT_ID: &str = "PRODUCT_ID";
pub const DEVICE_NAME: &str = "DEVICE_NAME";
/// Device access token (`version=...&res=...&et=...&method=...&sign=...`)
pub const DEVICE_TOKEN: &str = "DEVICE_TOKEN";

/// Modem UART baud rate
pub const MODEM_BAUD: u32 = 115_200;

pub fn cloud() -> CloudConfig {
    CloudConfig {
        product_id: PRODUCT_ID,
        device_name: DEVICE_NAME,
        password: DEVICE_TOKEN,
        ..CloudConfig::default()
    }
}

pub fn link() -> LinkConfig {
    LinkConfig {
        publish_mode: PublishMode::Auto,
        // the modem keeps retrying on its own; back off gently between rounds
        bringup_policy: BringupPolicy::Retry {
            attempts: None,
            backoff_ms: 10_000,
        },
        ..LinkConfig::default()
    }
}
