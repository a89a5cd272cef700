//! Outbound telemetry bodies
//!
//! Property posts, event posts and the desired-property request all carry
//! an incrementing message id in the OneNET thing-model envelope:
//!
//! ```text
//! {"id":"<n>","version":"1.0","params":{"<field>":{"value":<v>},...}}
//! ```

use core::fmt::Write as _;

use crate::state::{DeviceState, FieldValue, FIELD_NAMES};

use super::reply::{ReplyBody, ReplyBuilder, ReplyRequest};
use super::topics;
use super::CloudError;

/// Message id source and body formatter for outbound posts
#[derive(Debug)]
pub struct Telemetry {
    next_id: u32,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub const fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Id the next post will carry
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn envelope(&mut self) -> Result<ReplyBody, CloudError> {
        let mut body = ReplyBody::new();
        write!(body, "{{\"id\":\"{}\",\"version\":\"1.0\",\"params\":", self.take_id())
            .map_err(|_| CloudError::BodyTooLong)?;
        Ok(body)
    }

    /// `thing/property/post` with every field of `state`
    pub fn property_post(
        &mut self,
        builder: &ReplyBuilder<'_>,
        state: &DeviceState,
    ) -> Result<ReplyRequest, CloudError> {
        let mut body = self.envelope()?;
        body.push('{').map_err(|_| CloudError::BodyTooLong)?;
        for (i, name) in FIELD_NAMES.iter().enumerate() {
            let Some(value) = state.field(name) else {
                continue;
            };
            let sep = if i == 0 { "" } else { "," };
            write!(body, "{}\"{}\":{{\"value\":{}}}", sep, name, value)
                .map_err(|_| CloudError::BodyTooLong)?;
        }
        body.push_str("}}").map_err(|_| CloudError::BodyTooLong)?;
        builder.request(topics::PROPERTY_POST, body)
    }

    /// `thing/event/post` for `event`, carrying one field as its output
    pub fn event_post(
        &mut self,
        builder: &ReplyBuilder<'_>,
        event: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<ReplyRequest, CloudError> {
        let mut body = self.envelope()?;
        write!(
            body,
            "{{\"{}\":{{\"value\":{{\"{}\":{}}}}}}}}}",
            event, field, value
        )
        .map_err(|_| CloudError::BodyTooLong)?;
        builder.request(topics::EVENT_POST, body)
    }

    /// `thing/property/desired/get` asking for `crop_stage`
    pub fn desired_get(&mut self, builder: &ReplyBuilder<'_>) -> Result<ReplyRequest, CloudError> {
        let mut body = self.envelope()?;
        body.push_str("[\"crop_stage\"]}")
            .map_err(|_| CloudError::BodyTooLong)?;
        builder.request(topics::DESIRED_GET, body)
    }
}
