//! Inbound message dispatch
//!
//! Takes a complete frame from the receive buffer, classifies each
//! notification in it, updates [`DeviceState`], drives the actuators and
//! publishes the matching reply.
//!
//! Requests without an extractable id are never answered; the platform
//! cannot correlate a reply without one. They are logged and reported as
//! [`DispatchError::MalformedRequest`].

use agrilink_hal::{Actuators, Clock};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;

use crate::at::{AtEngine, PublishError};
use crate::scan;
use crate::state::DeviceState;

use super::message::{self, IncomingMessage, MessageClass};
use super::reply::{ReplyBuilder, ReplyRequest, CODE_BAD_REQUEST, CODE_OK};
use super::CloudError;

/// Service that selects an intervention mode from an integer `method`
pub const SERVICE_SET_INTERVENTION: &str = "set_intervention";
/// Service that sets the fan power from an integer `fan_power`
pub const SERVICE_SET_FAN_POWER: &str = "set_fan_power";

const LED_ON: &str = "LED_ON";
const LED_OFF: &str = "LED_OFF";

/// What dispatching one notification did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchOutcome {
    /// A reply with `code` was published
    Replied { class: MessageClass, code: u16 },
    /// State was updated; this class gets no reply
    Updated(MessageClass),
    /// Recognised, nothing to do
    Acknowledged(MessageClass),
}

/// Why a notification was not fully handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    /// Request id (or the service name) missing; no reply was sent
    MalformedRequest(MessageClass),
    /// Reply topic or body could not be built
    Reply(CloudError),
    /// Reply was built but the publish failed
    Publish(PublishError),
}

impl core::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MalformedRequest(class) => write!(f, "Malformed {:?} request", class),
            Self::Reply(e) => write!(f, "Cannot build reply: {}", e),
            Self::Publish(e) => write!(f, "Reply not delivered: {}", e),
        }
    }
}

impl core::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::MalformedRequest(_) => None,
            Self::Reply(e) => Some(e),
            Self::Publish(e) => Some(e),
        }
    }
}

impl From<CloudError> for DispatchError {
    fn from(e: CloudError) -> Self {
        Self::Reply(e)
    }
}

impl From<PublishError> for DispatchError {
    fn from(e: PublishError) -> Self {
        Self::Publish(e)
    }
}

/// Tally of one frame's dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: u8,
    pub ignored: u8,
    pub failed: u8,
    /// First failure in the frame
    pub first_error: Option<DispatchError>,
    /// Outcome of the last handled notification
    pub last_outcome: Option<DispatchOutcome>,
}

/// Classifies inbound frames and answers them
pub struct Dispatcher<'c> {
    replies: ReplyBuilder<'c>,
}

impl<'c> Dispatcher<'c> {
    pub fn new(replies: ReplyBuilder<'c>) -> Self {
        Self { replies }
    }

    pub fn replies(&self) -> &ReplyBuilder<'c> {
        &self.replies
    }

    /// Dispatch every notification in `frame`, in order
    ///
    /// A failure on one notification does not stop the rest.
    pub async fn classify_and_dispatch<A, Tx, C, D, const N: usize>(
        &self,
        frame: &str,
        state: &mut DeviceState,
        actuators: &mut A,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
    ) -> DispatchReport
    where
        A: Actuators,
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        let mut report = DispatchReport::default();
        for record in message::records(frame) {
            let Some(msg) = message::classify(&record) else {
                trace!("Ignoring frame without a known topic ({} bytes)", record.text.len());
                report.ignored = report.ignored.saturating_add(1);
                continue;
            };
            match self.dispatch(msg, state, actuators, engine).await {
                Ok(outcome) => {
                    report.handled = report.handled.saturating_add(1);
                    report.last_outcome = Some(outcome);
                }
                Err(e) => {
                    report.failed = report.failed.saturating_add(1);
                    if report.first_error.is_none() {
                        report.first_error = Some(e);
                    }
                }
            }
        }
        report
    }

    /// Act on one classified message
    pub async fn dispatch<A, Tx, C, D, const N: usize>(
        &self,
        msg: IncomingMessage<'_>,
        state: &mut DeviceState,
        actuators: &mut A,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        A: Actuators,
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        let class = msg.class;
        debug!("Dispatching {} on '{}'", class, msg.topic);

        if !class.wants_reply() {
            return Ok(match class {
                MessageClass::DesiredReply => self.on_desired_reply(&msg, state),
                _ => on_post_reply(&msg),
            });
        }

        let Some(id) = msg.request_id.as_deref() else {
            warn!("{} request without an id, not replying", class);
            return Err(DispatchError::MalformedRequest(class));
        };

        let (reply, code) = match class {
            MessageClass::PropertySet => self.on_property_set(id, &msg, state, actuators)?,
            MessageClass::ServiceInvoke => {
                let Some(service) = msg.service else {
                    warn!("Service invoke {} without a service name, not replying", id);
                    return Err(DispatchError::MalformedRequest(class));
                };
                self.on_service_invoke(id, service, &msg, state, actuators)?
            }
            MessageClass::PropertyGet => self.on_property_get(id, &msg, state)?,
            MessageClass::LegacyCommand => self.on_command(id, &msg, actuators)?,
            MessageClass::DesiredReply | MessageClass::PostReply => {
                return Ok(DispatchOutcome::Acknowledged(class))
            }
        };

        reply.submit(engine).await.map_err(|e| {
            error!("Reply to {} request {} failed: {}", class, id, e);
            DispatchError::Publish(e)
        })?;
        info!("Replied {} to {} request {}", code, class, id);
        Ok(DispatchOutcome::Replied { class, code })
    }

    fn on_property_set<A: Actuators>(
        &self,
        id: &str,
        msg: &IncomingMessage<'_>,
        state: &mut DeviceState,
        actuators: &mut A,
    ) -> Result<(ReplyRequest, u16), CloudError> {
        let crop_stage = scan::find_int(&msg.body, "crop_stage");
        let fan_power = scan::find_int(&msg.body, "fan_power");

        if crop_stage.is_none() && fan_power.is_none() {
            warn!("Property set {} has no valid property", id);
            let reply = self.replies.property_set(id, CODE_BAD_REQUEST, "no valid property")?;
            return Ok((reply, CODE_BAD_REQUEST));
        }
        if let Some(stage) = crop_stage {
            info!("crop_stage -> {}", stage);
            state.crop_stage = stage;
        }
        if let Some(requested) = fan_power {
            let applied = state.set_fan_power(requested);
            info!("fan_power -> {} (requested {})", applied, requested);
            actuators.set_fan_power(applied);
        }
        Ok((self.replies.property_set(id, CODE_OK, "success")?, CODE_OK))
    }

    fn on_service_invoke<A: Actuators>(
        &self,
        id: &str,
        service: &str,
        msg: &IncomingMessage<'_>,
        state: &mut DeviceState,
        actuators: &mut A,
    ) -> Result<(ReplyRequest, u16), CloudError> {
        let (code, text) = match service {
            SERVICE_SET_INTERVENTION => match scan::find_int(&msg.body, "method") {
                Some(mode) => {
                    info!("intervention_status -> {}", mode);
                    state.intervention_status = mode;
                    actuators.apply_intervention(mode);
                    (CODE_OK, "success")
                }
                None => (CODE_BAD_REQUEST, "missing method"),
            },
            SERVICE_SET_FAN_POWER => match scan::find_int(&msg.body, "fan_power") {
                Some(requested) => {
                    let applied = state.set_fan_power(requested);
                    info!("fan_power -> {} (requested {})", applied, requested);
                    actuators.set_fan_power(applied);
                    (CODE_OK, "success")
                }
                None => (CODE_BAD_REQUEST, "missing fan_power"),
            },
            _ => {
                warn!("Unknown service '{}'", service);
                (CODE_BAD_REQUEST, "unknown service")
            }
        };
        Ok((self.replies.service_invoke(service, id, code, text)?, code))
    }

    fn on_property_get(
        &self,
        id: &str,
        msg: &IncomingMessage<'_>,
        state: &DeviceState,
    ) -> Result<(ReplyRequest, u16), CloudError> {
        match scan::find_array(&msg.body, "params") {
            Some(params) => Ok((self.replies.property_get(id, params, state)?, CODE_OK)),
            None => {
                warn!("Property get {} without a params array", id);
                let reply = self.replies.property_get_error(id, CODE_BAD_REQUEST, "missing params")?;
                Ok((reply, CODE_BAD_REQUEST))
            }
        }
    }

    fn on_command<A: Actuators>(
        &self,
        id: &str,
        msg: &IncomingMessage<'_>,
        actuators: &mut A,
    ) -> Result<(ReplyRequest, u16), CloudError> {
        let text = if is_command(&msg.body, LED_OFF) {
            actuators.set_indicator(false);
            "LED has been turned OFF"
        } else if is_command(&msg.body, LED_ON) {
            actuators.set_indicator(true);
            "LED has been turned ON"
        } else {
            warn!("Unknown command '{}'", msg.body.as_str());
            "Unknown command"
        };
        Ok((self.replies.command_response(id, text)?, CODE_OK))
    }

    fn on_desired_reply(&self, msg: &IncomingMessage<'_>, state: &mut DeviceState) -> DispatchOutcome {
        let class = msg.class;
        if let Some(code) = scan::find_int(&msg.body, "code") {
            if code != i32::from(CODE_OK) {
                warn!("Desired property request rejected with code {}", code);
                return DispatchOutcome::Acknowledged(class);
            }
        }
        let stage = scan::find_nested_int(&msg.body, "crop_stage")
            .or_else(|| scan::find_int(&msg.body, "crop_stage"));
        match stage {
            Some(stage) => {
                info!("Desired crop_stage -> {}", stage);
                state.crop_stage = stage;
                DispatchOutcome::Updated(class)
            }
            None => {
                debug!("No desired crop_stage set");
                DispatchOutcome::Acknowledged(class)
            }
        }
    }
}

fn on_post_reply(msg: &IncomingMessage<'_>) -> DispatchOutcome {
    match scan::find_int(&msg.body, "code") {
        Some(200) | None => trace!("Telemetry acknowledged"),
        Some(code) => warn!("Telemetry rejected with code {}", code),
    }
    DispatchOutcome::Acknowledged(msg.class)
}

/// Whether a command body names `command`, bare or as a quoted JSON string
fn is_command(body: &str, command: &str) -> bool {
    let body = body.trim();
    if body == command {
        return true;
    }
    body.match_indices(command).any(|(at, _)| {
        body[..at].ends_with('"') && body[at + command.len()..].starts_with('"')
    })
}
