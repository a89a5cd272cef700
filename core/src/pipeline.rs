//! The device main loop
//!
//! One [`Link`] owns everything the main loop touches: the AT engine, the
//! device state, the actuators and the sensors. It runs
//!
//! ```text
//! bring-up -> subscribe -> loop { receive + dispatch, periodic publish }
//! ```
//!
//! and is the only caller of the engine, so transactions never overlap.

use agrilink_hal::{Actuators, Clock, Sensors};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;

use crate::at::AtEngine;
use crate::cloud::dispatch::{DispatchReport, Dispatcher};
use crate::cloud::reply::{ReplyBuilder, ReplyRequest};
use crate::cloud::telemetry::Telemetry;
use crate::cloud::{CloudError, Topics};
use crate::config::{CloudConfig, LinkConfig};
use crate::state::{DeviceState, FieldValue};
use crate::supervisor::{LinkStatus, Supervisor};

/// What one pass of the main loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Nothing to do; slept one poll interval
    Idle,
    /// A complete frame was dispatched
    Dispatched(DispatchReport),
    /// A telemetry cycle ran
    Published {
        posted: bool,
        /// Alert events sent this cycle
        alerts: u8,
    },
}

/// Latched alert conditions, so each crossing posts once
#[derive(Debug, Default)]
struct AlertLatch {
    high_temperature: bool,
    high_wind: bool,
}

/// Bring-up, dispatch and telemetry over one modem
pub struct Link<'a, Tx, C, D, A, S, const N: usize> {
    engine: AtEngine<'a, Tx, C, D, N>,
    cloud: CloudConfig,
    config: LinkConfig,
    topics: Topics<'static>,
    dispatcher: Dispatcher<'static>,
    telemetry: Telemetry,
    state: DeviceState,
    actuators: A,
    sensors: S,
    latch: AlertLatch,
    next_publish_ms: u64,
}

impl<'a, Tx, C, D, A, S, const N: usize> Link<'a, Tx, C, D, A, S, N>
where
    Tx: Write,
    C: Clock,
    D: DelayNs,
    A: Actuators,
    S: Sensors,
{
    pub fn new(
        engine: AtEngine<'a, Tx, C, D, N>,
        cloud: CloudConfig,
        config: LinkConfig,
        actuators: A,
        sensors: S,
    ) -> Result<Self, CloudError> {
        let topics = Topics::new(cloud.product_id, cloud.device_name)?;
        let dispatcher = Dispatcher::new(ReplyBuilder::new(topics, config.publish_mode));
        let next_publish_ms = engine.now_ms();
        Ok(Self {
            engine,
            cloud,
            config,
            topics,
            dispatcher,
            telemetry: Telemetry::new(),
            state: DeviceState::default(),
            actuators,
            sensors,
            latch: AlertLatch::default(),
            next_publish_ms,
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    /// Bring the link up, then ask for the desired `crop_stage`
    ///
    /// The first telemetry post goes out on the next poll.
    pub async fn start(&mut self) -> LinkStatus {
        // start from known actuator outputs
        self.actuators.set_fan_power(self.state.fan_power);
        self.actuators.apply_intervention(self.state.intervention_status);

        let supervisor = Supervisor::new(&self.cloud, &self.config, self.topics);
        let status = supervisor.bring_up_with_policy(&mut self.engine).await;
        if status.is_online() && self.config.request_desired_on_start {
            let request = self.telemetry.desired_get(self.dispatcher.replies());
            if !self.publish(request).await {
                warn!("Desired property request not sent");
            }
        }
        self.next_publish_ms = self.engine.now_ms();
        status
    }

    /// One main loop pass: dispatch a complete frame if there is one,
    /// else publish telemetry if due, else sleep one poll interval
    pub async fn poll_once(&mut self) -> PollEvent {
        let now_ms = self.engine.now_ms();
        let rx = self.engine.rx();

        if rx.is_frame_complete(now_ms, self.config.idle_threshold_ms) {
            let frame = rx.take_frame();
            if frame.dropped() > 0 {
                warn!(
                    "Receive buffer overflow: {} bytes dropped ({} since boot)",
                    frame.dropped(),
                    rx.overflow_count()
                );
            }
            let report = self
                .dispatcher
                .classify_and_dispatch(
                    frame.as_text(),
                    &mut self.state,
                    &mut self.actuators,
                    &mut self.engine,
                )
                .await;
            if let Some(e) = report.first_error {
                warn!("Frame dispatch: {} handled, {} failed: {}", report.handled, report.failed, e);
            }
            return PollEvent::Dispatched(report);
        }

        // a notification is still arriving
        if self.config.publish_interval_ms > 0
            && now_ms >= self.next_publish_ms
            && rx.available_len() == 0
        {
            self.next_publish_ms = now_ms + u64::from(self.config.publish_interval_ms);
            return self.publish_cycle().await;
        }

        self.engine.pause(self.config.poll_interval_ms).await;
        PollEvent::Idle
    }

    /// Run forever
    pub async fn run(&mut self) -> ! {
        loop {
            self.poll_once().await;
        }
    }

    /// Sample sensors, post properties, post any newly raised alerts
    async fn publish_cycle(&mut self) -> PollEvent {
        match self.sensors.sample() {
            Some(sample) => self.state.apply_sample(&sample),
            None => debug!("Sensors not ready, posting last values"),
        }

        let post = self
            .telemetry
            .property_post(self.dispatcher.replies(), &self.state);
        let posted = self.publish(post).await;

        let thresholds = self.config.alerts;
        let mut alerts = 0;
        let temp1 = self.state.temp1;
        if latch_rising(&mut self.latch.high_temperature, temp1 > thresholds.high_temp_c) {
            warn!("High temperature: {}", temp1);
            let event = self.telemetry.event_post(
                self.dispatcher.replies(),
                "high_temperature",
                "temp1",
                FieldValue::Float(temp1),
            );
            if self.publish(event).await {
                alerts += 1;
            }
        }
        let wind = self.state.wind_speed;
        if latch_rising(&mut self.latch.high_wind, wind > thresholds.high_wind_ms) {
            warn!("High wind: {}", wind);
            let event = self.telemetry.event_post(
                self.dispatcher.replies(),
                "high_wind",
                "wind_speed",
                FieldValue::Float(wind),
            );
            if self.publish(event).await {
                alerts += 1;
            }
        }

        PollEvent::Published { posted, alerts }
    }

    /// Submit one outbound request; failures are logged and dropped
    async fn publish(&mut self, request: Result<ReplyRequest, CloudError>) -> bool {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                error!("Cannot build publish: {}", e);
                return false;
            }
        };
        match request.submit(&mut self.engine).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Publish to '{}' dropped: {}", request.topic.as_str(), e);
                false
            }
        }
    }
}

/// Set `latch` to `active`; true only on the inactive-to-active edge
fn latch_rising(latch: &mut bool, active: bool) -> bool {
    let rising = active && !*latch;
    *latch = active;
    rising
}
