//! Connection bring-up
//!
//! Runs the fixed sequence that takes the modem from power-on to an
//! authenticated, subscribed MQTT session:
//!
//! ```text
//! AT -> ATE0 -> AT+CIMI -> AT+CGATT=1 -> AT+CGATT? (polled)
//!    -> AT+QMTCFG="version" -> AT+QMTOPEN -> AT+QMTCONN -> AT+QMTSUB (each filter)
//! ```
//!
//! Each step must succeed before the next one runs. What to do on failure
//! is decided by [`BringupPolicy`], not by the steps themselves.

use core::fmt::Write as _;

use agrilink_hal::Clock;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;
use heapless::String;

use crate::at::{AtEngine, TransactionError};
use crate::cloud::topics::{self, Topics};
use crate::config::{BringupPolicy, CloudConfig, LinkConfig};

/// One step of the bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BringupStep {
    Liveness,
    EchoOff,
    SimRead,
    AttachRequest,
    AttachConfirm,
    ProtocolVersion,
    OpenNetwork,
    Connect,
    /// Index into [`topics::SUBSCRIPTIONS`]
    Subscribe(u8),
}

/// The step that failed and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BringupError {
    pub step: BringupStep,
    pub source: TransactionError,
}

impl core::fmt::Display for BringupError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Bring-up failed at {:?}: {}", self.step, self.source)
    }
}

impl core::error::Error for BringupError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Link state after applying the bring-up policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    Online,
    /// Sequence completed with a failed step (`BringupPolicy::Continue`)
    Degraded(BringupError),
    Offline(BringupError),
}

impl LinkStatus {
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline(_))
    }
}

/// Sequences the bring-up steps over an [`AtEngine`]
pub struct Supervisor<'c> {
    cloud: &'c CloudConfig,
    config: &'c LinkConfig,
    topics: Topics<'c>,
}

impl<'c> Supervisor<'c> {
    pub fn new(cloud: &'c CloudConfig, config: &'c LinkConfig, topics: Topics<'c>) -> Self {
        Self {
            cloud,
            config,
            topics,
        }
    }

    /// Run the sequence once, stopping at the first failed step
    pub async fn bring_up<Tx, C, D, const N: usize>(
        &self,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
    ) -> Result<(), BringupError>
    where
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        self.run_sequence(engine, false).await
    }

    /// Run the sequence under the configured [`BringupPolicy`]
    pub async fn bring_up_with_policy<Tx, C, D, const N: usize>(
        &self,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
    ) -> LinkStatus
    where
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        match self.config.bringup_policy {
            BringupPolicy::Halt => match self.run_sequence(engine, false).await {
                Ok(()) => LinkStatus::Online,
                Err(e) => {
                    error!("{}; halting", e);
                    LinkStatus::Offline(e)
                }
            },
            BringupPolicy::Continue => match self.run_sequence(engine, true).await {
                Ok(()) => LinkStatus::Online,
                Err(e) => {
                    warn!("{}; continuing anyway", e);
                    LinkStatus::Degraded(e)
                }
            },
            BringupPolicy::Retry {
                attempts,
                backoff_ms,
            } => {
                let mut attempt: u32 = 0;
                loop {
                    attempt = attempt.saturating_add(1);
                    let err = match self.run_sequence(engine, false).await {
                        Ok(()) => return LinkStatus::Online,
                        Err(e) => e,
                    };
                    if attempts.is_some_and(|max| attempt >= max) {
                        error!("{}; giving up after {} attempts", err, attempt);
                        return LinkStatus::Offline(err);
                    }
                    warn!("{}; retrying in {} ms", err, backoff_ms);
                    // drop any half-open session before starting over
                    if engine
                        .send_and_wait("AT+QMTCLOSE=0", "OK", self.config.command_timeout_ms)
                        .await
                        .is_err()
                    {
                        debug!("No MQTT session to close");
                    }
                    engine.pause(backoff_ms).await;
                }
            }
        }
    }

    /// With `keep_going`, a failed step is logged and the rest still run;
    /// the first failure is returned at the end
    async fn run_sequence<Tx, C, D, const N: usize>(
        &self,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
        keep_going: bool,
    ) -> Result<(), BringupError>
    where
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        let cfg = self.config;
        let mut first_error: Option<BringupError> = None;
        let mut record = |result: Result<(), BringupError>| -> Result<(), BringupError> {
            match result {
                Ok(()) => Ok(()),
                Err(e) if keep_going => {
                    warn!("{}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        info!("Modem bring-up started");
        engine.drain();

        record(step(BringupStep::Liveness, engine.send_and_wait("AT", "OK", cfg.command_timeout_ms).await))?;
        if cfg.disable_echo {
            record(step(BringupStep::EchoOff, engine.send_and_wait("ATE0", "OK", cfg.command_timeout_ms).await))?;
        }
        record(step(BringupStep::SimRead, engine.send_and_wait("AT+CIMI", "OK", cfg.command_timeout_ms).await))?;
        record(step(
            BringupStep::AttachRequest,
            engine.send_and_wait("AT+CGATT=1", "OK", cfg.attach_timeout_ms).await,
        ))?;
        record(self.confirm_attach(engine).await)?;
        record(step(
            BringupStep::ProtocolVersion,
            engine
                .send_command(
                    format_args!("AT+QMTCFG=\"version\",0,{}", cfg.mqtt_version),
                    "OK",
                    cfg.command_timeout_ms,
                )
                .await,
        ))?;
        record(step(
            BringupStep::OpenNetwork,
            engine
                .send_command(
                    format_args!(
                        "AT+QMTOPEN=0,\"{}\",{}",
                        self.cloud.broker_host, self.cloud.broker_port
                    ),
                    "+QMTOPEN: 0,0",
                    cfg.open_timeout_ms,
                )
                .await,
        ))?;
        record(step(
            BringupStep::Connect,
            engine
                .send_command(
                    format_args!(
                        "AT+QMTCONN=0,\"{}\",\"{}\",\"{}\"",
                        self.cloud.device_name, self.cloud.product_id, self.cloud.password
                    ),
                    "+QMTCONN: 0,0,0",
                    cfg.connect_timeout_ms,
                )
                .await,
        ))?;
        for (i, suffix) in topics::SUBSCRIPTIONS.iter().enumerate() {
            let index = u8::try_from(i).unwrap_or(u8::MAX);
            record(self.subscribe(engine, index, suffix).await)?;
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Modem online, {} topics subscribed", topics::SUBSCRIPTIONS.len());
                Ok(())
            }
        }
    }

    /// Poll `AT+CGATT?` until attached or out of retries
    async fn confirm_attach<Tx, C, D, const N: usize>(
        &self,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
    ) -> Result<(), BringupError>
    where
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        let cfg = self.config;
        let mut last = TransactionError::Timeout;
        for attempt in 1..=cfg.attach_retries.max(1) {
            match engine
                .send_and_wait("AT+CGATT?", "+CGATT: 1", cfg.command_timeout_ms)
                .await
            {
                Ok(()) => {
                    info!("Network attached after {} polls", attempt);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Not attached yet ({})", attempt);
                    last = e;
                    engine.pause(cfg.attach_retry_interval_ms).await;
                }
            }
        }
        Err(BringupError {
            step: BringupStep::AttachConfirm,
            source: last,
        })
    }

    async fn subscribe<Tx, C, D, const N: usize>(
        &self,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
        index: u8,
        suffix: &str,
    ) -> Result<(), BringupError>
    where
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        let fail = |source| BringupError {
            step: BringupStep::Subscribe(index),
            source,
        };
        let filter = self
            .topics
            .topic(suffix)
            .map_err(|_| fail(TransactionError::CommandTooLong))?;
        // message ids start at 1
        let msg_id = u16::from(index) + 1;
        let mut expect: String<24> = String::new();
        write!(expect, "+QMTSUB: 0,{},0", msg_id).map_err(|_| fail(TransactionError::CommandTooLong))?;

        engine
            .send_command(
                format_args!("AT+QMTSUB=0,{},\"{}\",1", msg_id, filter.as_str()),
                &expect,
                self.config.subscribe_timeout_ms,
            )
            .await
            .map_err(fail)
    }
}

fn step(step: BringupStep, result: Result<(), TransactionError>) -> Result<(), BringupError> {
    match result {
        Ok(()) => {
            debug!("Bring-up step {} ok", step);
            Ok(())
        }
        Err(source) => Err(BringupError { step, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rx::ReceiveBuffer;
    use crate::sim::{SimClock, SimModem};
    use embassy_futures::block_on;

    fn cloud() -> CloudConfig {
        CloudConfig {
            product_id: "P",
            device_name: "D",
            password: "secret",
            ..CloudConfig::default()
        }
    }

    #[test]
    fn test_bring_up_sequence() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<512> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.script_bring_up(3);

        let cloud = cloud();
        let config = LinkConfig::default();
        let supervisor = Supervisor::new(&cloud, &config, Topics::new("P", "D").unwrap());
        let mut engine = modem.engine(&config);

        assert_eq!(block_on(supervisor.bring_up(&mut engine)), Ok(()));
        assert_eq!(modem.unused_exchanges(), 0);

        let sent = modem.sent();
        assert_eq!(sent[0], "AT\r\n");
        assert!(sent.contains(&"AT+QMTSUB=0,1,\"$sys/P/D/thing/property/set\",1\r\n".into()));
        assert!(sent.contains(&"AT+QMTSUB=0,6,\"$sys/P/D/cmd/request/+\",1\r\n".into()));
    }

    #[test]
    fn test_attach_gives_up() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<512> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        let config = LinkConfig {
            attach_retries: 3,
            disable_echo: false,
            ..LinkConfig::default()
        };
        modem.expect("AT\r\n", &[(5, "\r\nOK\r\n")]);
        modem.expect("AT+CIMI", &[(5, "\r\nOK\r\n")]);
        modem.expect("AT+CGATT=1", &[(5, "\r\nOK\r\n")]);
        for _ in 0..3 {
            modem.expect("AT+CGATT?", &[(5, "\r\n+CGATT: 0\r\n\r\nOK\r\n")]);
        }

        let cloud = cloud();
        let supervisor = Supervisor::new(&cloud, &config, Topics::new("P", "D").unwrap());
        let mut engine = modem.engine(&config);

        assert_eq!(
            block_on(supervisor.bring_up(&mut engine)),
            Err(BringupError {
                step: BringupStep::AttachConfirm,
                source: TransactionError::Timeout
            })
        );
        // nothing after the failed step
        assert!(!modem.written().contains("QMTCFG"));
    }

    #[test]
    fn test_halt_policy_reports_step() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<512> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT\r\n", &[(5, "\r\nERROR\r\n")]);

        let cloud = cloud();
        let config = LinkConfig {
            bringup_policy: BringupPolicy::Halt,
            ..LinkConfig::default()
        };
        let supervisor = Supervisor::new(&cloud, &config, Topics::new("P", "D").unwrap());
        let mut engine = modem.engine(&config);

        let status = block_on(supervisor.bring_up_with_policy(&mut engine));
        assert_eq!(
            status,
            LinkStatus::Offline(BringupError {
                step: BringupStep::Liveness,
                source: TransactionError::ModemError
            })
        );
        assert!(!status.is_online());
        assert_eq!(modem.sent().len(), 1);
    }

    #[test]
    fn test_retry_policy_recovers() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<512> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        // first attempt: modem still booting
        modem.expect("AT\r\n", &[]);
        modem.expect("AT+QMTCLOSE=0", &[(5, "\r\nERROR\r\n")]);
        modem.script_bring_up(1);

        let cloud = cloud();
        let config = LinkConfig {
            bringup_policy: BringupPolicy::Retry {
                attempts: Some(2),
                backoff_ms: 1000,
            },
            ..LinkConfig::default()
        };
        let supervisor = Supervisor::new(&cloud, &config, Topics::new("P", "D").unwrap());
        let mut engine = modem.engine(&config);

        assert_eq!(block_on(supervisor.bring_up_with_policy(&mut engine)), LinkStatus::Online);
        assert_eq!(modem.unused_exchanges(), 0);
    }

    #[test]
    fn test_retry_policy_gives_up() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<512> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);

        let cloud = cloud();
        let config = LinkConfig {
            bringup_policy: BringupPolicy::Retry {
                attempts: Some(3),
                backoff_ms: 500,
            },
            ..LinkConfig::default()
        };
        let supervisor = Supervisor::new(&cloud, &config, Topics::new("P", "D").unwrap());
        let mut engine = modem.engine(&config);

        let status = block_on(supervisor.bring_up_with_policy(&mut engine));
        assert!(matches!(
            status,
            LinkStatus::Offline(BringupError {
                step: BringupStep::Liveness,
                ..
            })
        ));
        let liveness = modem.sent().iter().filter(|s| s.as_str() == "AT\r\n").count();
        assert_eq!(liveness, 3);
    }

    #[test]
    fn test_continue_policy_runs_every_step() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<512> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        let config = LinkConfig {
            bringup_policy: BringupPolicy::Continue,
            attach_retries: 1,
            ..LinkConfig::default()
        };

        let cloud = cloud();
        let supervisor = Supervisor::new(&cloud, &config, Topics::new("P", "D").unwrap());
        let mut engine = modem.engine(&config);

        let status = block_on(supervisor.bring_up_with_policy(&mut engine));
        assert_eq!(
            status,
            LinkStatus::Degraded(BringupError {
                step: BringupStep::Liveness,
                source: TransactionError::Timeout
            })
        );
        assert!(status.is_online());
        // every subscription still attempted
        assert!(modem.written().contains("AT+QMTSUB=0,6,"));
    }
}
