//! Link configuration structures

/// OneNET device credentials and broker endpoint
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Product id, the `{pid}` in every `$sys/{pid}/{dev}/...` topic
    pub product_id: &'static str,
    /// Device name, the `{dev}` in every topic and the MQTT client id
    pub device_name: &'static str,
    /// Pre-computed OneNET token used as the MQTT password
    pub password: &'static str,
    pub broker_host: &'static str,
    pub broker_port: u16,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            product_id: "",
            device_name: "",
            password: "",
            broker_host: "mqtts.heclouds.com",
            broker_port: 1883,
        }
    }
}

/// How replies and telemetry are handed to the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishMode {
    /// Quoted `AT+QMTPUB` when the payload allows it, prompt mode otherwise
    Auto,
    /// Always quoted `AT+QMTPUB`, relying on the modem taking the last
    /// quote on the line as the end of the payload
    Quoted,
    /// Always `AT+QMTPUBEX` with the `>` prompt
    Prompt,
}

/// What to do when a bring-up step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BringupPolicy {
    /// Report the failure and stay offline
    Halt,
    /// Restart the sequence from the top after `backoff_ms`;
    /// `attempts: None` retries forever
    Retry {
        attempts: Option<u32>,
        backoff_ms: u32,
    },
    /// Log the failed step and carry on with the rest of the sequence
    Continue,
}

/// Edge-triggered alert thresholds for event posts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    /// Air temperature above which `high_temperature` fires (°C)
    pub high_temp_c: f32,
    /// Wind speed above which `high_wind` fires (m/s)
    pub high_wind_ms: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_temp_c: 40.0,
            high_wind_ms: 15.0,
        }
    }
}

/// Timing and behaviour of the modem link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Quiet time after the last byte before a frame counts as complete
    pub idle_threshold_ms: u32,
    /// Sleep between receive buffer polls
    pub poll_interval_ms: u32,
    /// Timeout for plain commands (`AT`, `AT+CIMI`, ...)
    pub command_timeout_ms: u32,
    /// Timeout for `AT+CGATT=1`
    pub attach_timeout_ms: u32,
    /// `AT+CGATT?` polls before giving up on network attach
    pub attach_retries: u32,
    pub attach_retry_interval_ms: u32,
    pub open_timeout_ms: u32,
    pub connect_timeout_ms: u32,
    pub subscribe_timeout_ms: u32,
    /// Timeout for a publish confirmation
    pub publish_timeout_ms: u32,
    /// Timeout for the `>` prompt in prompt-mode publish
    pub prompt_timeout_ms: u32,
    /// Telemetry period; 0 disables telemetry
    pub publish_interval_ms: u32,
    /// `AT+QMTCFG="version"` value (4 = MQTT 3.1.1)
    pub mqtt_version: u8,
    /// Send `ATE0` during bring-up
    pub disable_echo: bool,
    pub publish_mode: PublishMode,
    /// Ask the platform for desired `crop_stage` once online
    pub request_desired_on_start: bool,
    pub alerts: AlertThresholds,
    pub bringup_policy: BringupPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 50,
            poll_interval_ms: 5,
            command_timeout_ms: 1000,
            attach_timeout_ms: 10_000,
            attach_retries: 10,
            attach_retry_interval_ms: 1000,
            open_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            subscribe_timeout_ms: 5000,
            publish_timeout_ms: 5000,
            prompt_timeout_ms: 2000,
            publish_interval_ms: 30_000,
            mqtt_version: 4,
            disable_echo: true,
            publish_mode: PublishMode::Auto,
            request_desired_on_start: true,
            alerts: AlertThresholds::default(),
            bringup_policy: BringupPolicy::Retry {
                attempts: None,
                backoff_ms: 5000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.idle_threshold_ms, 50);
        assert_eq!(config.poll_interval_ms, 5);
        assert!(config.poll_interval_ms < config.idle_threshold_ms);
        assert_eq!(config.publish_mode, PublishMode::Auto);
    }

    #[test]
    fn test_cloud_defaults() {
        let cloud = CloudConfig::default();
        assert_eq!(cloud.broker_host, "mqtts.heclouds.com");
        assert_eq!(cloud.broker_port, 1883);
    }
}
