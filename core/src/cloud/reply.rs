//! Reply bodies and their delivery
//!
//! Every reply ends in exactly one publish through the AT engine, either
//! as a quoted `AT+QMTPUB` argument or through the two-phase prompt mode.
//!
//! Invoke replies always carry a `data` object, even an empty one. The
//! platform treats an invoke reply without it as malformed and reports the
//! call as timed out.

use core::fmt::Write as _;

use agrilink_hal::Clock;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;
use heapless::String;

use crate::at::{AtEngine, PublishError, CMD_CAPACITY, PROMPT_PUBLISH_CONFIRM, QUOTED_PUBLISH_OK};
use crate::config::PublishMode;
use crate::scan;
use crate::state::{DeviceState, FIELD_NAMES};

use super::topics::{self, TopicBuf, Topics};
use super::CloudError;

/// Capacity of an outbound JSON body
pub const REPLY_BODY_CAPACITY: usize = 768;

pub type ReplyBody = String<REPLY_BODY_CAPACITY>;

/// Platform result codes
pub const CODE_OK: u16 = 200;
pub const CODE_BAD_REQUEST: u16 = 400;

/// `AT+QMTPUB=0,0,0,0,"",""` without topic and payload
const QUOTED_OVERHEAD: usize = 22;

/// How a publish is handed to the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// Payload as a quoted command argument
    Quoted,
    /// `>` prompt, then the raw payload
    Prompt,
}

impl Delivery {
    pub fn choose(mode: PublishMode, topic: &str, payload: &str) -> Self {
        match mode {
            PublishMode::Quoted => Self::Quoted,
            PublishMode::Prompt => Self::Prompt,
            PublishMode::Auto => {
                let fits = QUOTED_OVERHEAD + topic.len() + payload.len() <= CMD_CAPACITY;
                let safe = !payload.contains(['"', '\r', '\n', '\u{1a}']);
                if fits && safe {
                    Self::Quoted
                } else {
                    Self::Prompt
                }
            }
        }
    }

    /// Text the modem prints once the publish went through
    pub fn expect(self) -> &'static str {
        match self {
            Self::Quoted => QUOTED_PUBLISH_OK,
            Self::Prompt => PROMPT_PUBLISH_CONFIRM,
        }
    }
}

/// One outbound publish: topic, JSON body and the confirmation to wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub topic: TopicBuf,
    pub body: ReplyBody,
    pub delivery: Delivery,
    pub expect: &'static str,
}

impl ReplyRequest {
    pub fn new(topic: TopicBuf, body: ReplyBody, mode: PublishMode) -> Self {
        let delivery = Delivery::choose(mode, &topic, &body);
        Self {
            topic,
            body,
            delivery,
            expect: delivery.expect(),
        }
    }

    /// Run the publish: exactly one engine call
    pub async fn submit<Tx, C, D, const N: usize>(
        &self,
        engine: &mut AtEngine<'_, Tx, C, D, N>,
    ) -> Result<(), PublishError>
    where
        Tx: Write,
        C: Clock,
        D: DelayNs,
    {
        debug!("Publishing {} bytes to '{}'", self.body.len(), self.topic.as_str());
        match self.delivery {
            Delivery::Quoted => engine.publish_quoted(&self.topic, &self.body, self.expect).await,
            Delivery::Prompt => {
                engine
                    .publish_with_prompt(&self.topic, &self.body, self.expect)
                    .await
            }
        }
    }
}

fn body(args: core::fmt::Arguments<'_>) -> Result<ReplyBody, CloudError> {
    let mut body = ReplyBody::new();
    body.write_fmt(args).map_err(|_| CloudError::BodyTooLong)?;
    Ok(body)
}

/// Builds reply requests for one device
#[derive(Debug, Clone, Copy)]
pub struct ReplyBuilder<'c> {
    topics: Topics<'c>,
    mode: PublishMode,
}

impl<'c> ReplyBuilder<'c> {
    pub fn new(topics: Topics<'c>, mode: PublishMode) -> Self {
        Self { topics, mode }
    }

    pub fn topics(&self) -> &Topics<'c> {
        &self.topics
    }

    /// Wrap an arbitrary body for `suffix` under the device topic root
    pub fn request(&self, suffix: &str, body: ReplyBody) -> Result<ReplyRequest, CloudError> {
        Ok(ReplyRequest::new(self.topics.topic(suffix)?, body, self.mode))
    }

    /// `set_reply`: `{"id":..,"code":..,"msg":..}`
    pub fn property_set(&self, id: &str, code: u16, msg: &str) -> Result<ReplyRequest, CloudError> {
        let body = body(format_args!(
            "{{\"id\":\"{}\",\"code\":{},\"msg\":\"{}\"}}",
            id, code, msg
        ))?;
        self.request(topics::PROPERTY_SET_REPLY, body)
    }

    /// `invoke_reply` for `service`, always with a `data` object
    pub fn service_invoke(
        &self,
        service: &str,
        id: &str,
        code: u16,
        msg: &str,
    ) -> Result<ReplyRequest, CloudError> {
        let body = body(format_args!(
            "{{\"id\":\"{}\",\"code\":{},\"msg\":\"{}\",\"data\":{{}}}}",
            id, code, msg
        ))?;
        Ok(ReplyRequest::new(self.topics.invoke_reply(service)?, body, self.mode))
    }

    /// `get_reply` holding every field whose quoted name appears in `params`
    pub fn property_get(
        &self,
        id: &str,
        params: &str,
        state: &DeviceState,
    ) -> Result<ReplyRequest, CloudError> {
        let mut body = body(format_args!(
            "{{\"id\":\"{}\",\"code\":{},\"msg\":\"success\",\"data\":{{",
            id, CODE_OK
        ))?;
        let mut first = true;
        for name in FIELD_NAMES {
            if !scan::array_contains(params, name) {
                continue;
            }
            let Some(value) = state.field(name) else {
                continue;
            };
            let sep = if first { "" } else { "," };
            write!(body, "{}\"{}\":{}", sep, name, value).map_err(|_| CloudError::BodyTooLong)?;
            first = false;
        }
        body.push_str("}}").map_err(|_| CloudError::BodyTooLong)?;
        self.request(topics::PROPERTY_GET_REPLY, body)
    }

    /// `get_reply` for a request that could not be answered
    pub fn property_get_error(&self, id: &str, code: u16, msg: &str) -> Result<ReplyRequest, CloudError> {
        let body = body(format_args!(
            "{{\"id\":\"{}\",\"code\":{},\"msg\":\"{}\",\"data\":{{}}}}",
            id, code, msg
        ))?;
        self.request(topics::PROPERTY_GET_REPLY, body)
    }

    /// `cmd/response/{id}`: `{"msg":..}`
    pub fn command_response(&self, id: &str, msg: &str) -> Result<ReplyRequest, CloudError> {
        let body = body(format_args!("{{\"msg\":\"{}\"}}", msg))?;
        Ok(ReplyRequest::new(self.topics.command_response(id)?, body, self.mode))
    }
}
