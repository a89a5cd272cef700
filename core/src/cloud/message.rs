//! Inbound notification classification
//!
//! The modem reports every message on a subscribed topic as
//!
//! ```text
//! +QMTRECV: <client>,<msg_id>,"<topic>",["<len>",]"<payload>"
//! ```
//!
//! A frame from the receive buffer may hold several of these when two
//! notifications arrived inside the idle threshold, so [`records`] splits
//! the frame first. Classification is plain substring matching on the
//! record text, checked in a fixed order where the first match wins.

use heapless::String;

use crate::scan::{self, RequestId};

/// Marker that starts every inbound publish notification
pub const RECV_MARKER: &str = "+QMTRECV:";

/// Capacity of an unescaped request body
pub const BODY_CAPACITY: usize = 1024;

pub type Body = String<BODY_CAPACITY>;

const SERVICE_PREFIX: &str = "/thing/service/";
const INVOKE_SUFFIX: &str = "/invoke";
const COMMAND_PREFIX: &str = "/cmd/request/";

/// What kind of request a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageClass {
    PropertySet,
    ServiceInvoke,
    PropertyGet,
    /// Answer to our own desired-property request; never replied to
    DesiredReply,
    /// `cmd/request/{id}` with a plain-text payload
    LegacyCommand,
    /// Platform acknowledgement of a telemetry post
    PostReply,
}

impl MessageClass {
    /// Classify by substring, in precedence order
    pub fn of(text: &str) -> Option<Self> {
        if text.contains("/thing/property/set") {
            Some(Self::PropertySet)
        } else if text.contains(SERVICE_PREFIX) && text.contains(INVOKE_SUFFIX) {
            Some(Self::ServiceInvoke)
        } else if text.contains("/thing/property/get") && !text.contains("/desired/get") {
            Some(Self::PropertyGet)
        } else if text.contains("/thing/property/desired/get/reply") {
            Some(Self::DesiredReply)
        } else if text.contains(COMMAND_PREFIX) {
            Some(Self::LegacyCommand)
        } else if text.contains("/thing/property/post/reply") {
            Some(Self::PostReply)
        } else {
            None
        }
    }

    /// Whether the platform expects an answer to this class
    pub fn wants_reply(self) -> bool {
        !matches!(self, Self::DesiredReply | Self::PostReply)
    }
}

/// One notification cut out of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'f> {
    /// The whole record, used for classification
    pub text: &'f str,
    /// Topic, or empty if the record had no quoted topic
    pub topic: &'f str,
    /// Payload as the modem printed it, quotes stripped
    pub payload: &'f str,
}

impl<'f> Record<'f> {
    /// Pick topic and payload out of a `+QMTRECV:` record
    ///
    /// The topic is the first quoted field. The payload is either the
    /// next quoted field up to the last quote on the line, or a bare
    /// `{...}` object if the modem printed it unquoted.
    pub fn parse(text: &'f str) -> Self {
        let line_end = text.find(['\r', '\n']).unwrap_or(text.len());
        let line = &text[..line_end];
        let body = line.strip_prefix(RECV_MARKER).unwrap_or(line);

        let Some(open) = body.find('"') else {
            return Self { text, topic: "", payload: body.trim() };
        };
        let after_open = &body[open + 1..];
        let Some(close) = after_open.find('"') else {
            return Self { text, topic: "", payload: body.trim() };
        };
        let topic = &after_open[..close];
        let rest = &after_open[close + 1..];

        let payload = match rest.find(['"', '{']) {
            Some(start) if rest[start..].starts_with('{') => {
                let object = &rest[start..];
                match object.rfind('}') {
                    Some(end) => &object[..=end],
                    None => object,
                }
            }
            Some(start) => {
                let inner = &rest[start + 1..];
                match inner.rfind('"') {
                    Some(end) => &inner[..end],
                    None => inner.trim_end(),
                }
            }
            None => "",
        };

        Self { text, topic, payload }
    }

    /// A frame with no `+QMTRECV:` marker, scanned as a whole
    fn unstructured(text: &'f str) -> Self {
        Self {
            text,
            topic: "",
            payload: text.trim(),
        }
    }
}

/// Iterator over the records in one frame
pub struct Records<'f> {
    rest: &'f str,
    fallback: Option<&'f str>,
}

/// Split a frame into `+QMTRECV:` records
///
/// A frame without any marker is yielded whole, once, unless it is blank.
pub fn records(frame: &str) -> Records<'_> {
    if frame.contains(RECV_MARKER) {
        Records {
            rest: frame,
            fallback: None,
        }
    } else {
        Records {
            rest: "",
            fallback: Some(frame).filter(|f| !f.trim().is_empty()),
        }
    }
}

impl<'f> Iterator for Records<'f> {
    type Item = Record<'f>;

    fn next(&mut self) -> Option<Record<'f>> {
        if let Some(frame) = self.fallback.take() {
            return Some(Record::unstructured(frame));
        }
        let start = self.rest.find(RECV_MARKER)?;
        let from = start + RECV_MARKER.len();
        let end = self.rest[from..]
            .find(RECV_MARKER)
            .map_or(self.rest.len(), |i| from + i);
        let text = &self.rest[start..end];
        self.rest = &self.rest[end..];
        Some(Record::parse(text))
    }
}

/// A classified request, valid for one dispatch cycle
#[derive(Debug, Clone)]
pub struct IncomingMessage<'f> {
    pub class: MessageClass,
    pub topic: &'f str,
    /// `None` when the id could not be extracted
    pub request_id: Option<RequestId>,
    /// Service name from the topic path, for `ServiceInvoke`
    pub service: Option<&'f str>,
    /// Payload with escaped quotes undone; empty if it did not fit
    pub body: Body,
}

/// Text between `/thing/service/` and the following `/invoke`
fn service_name(text: &str) -> Option<&str> {
    let start = text.find(SERVICE_PREFIX)? + SERVICE_PREFIX.len();
    let rest = &text[start..];
    let name = &rest[..rest.find(INVOKE_SUFFIX)?];
    (!name.is_empty() && !name.contains(['/', '"'])).then_some(name)
}

/// Path segment after `/cmd/request/` up to the next quote
fn command_id(text: &str) -> Option<RequestId> {
    let start = text.find(COMMAND_PREFIX)? + COMMAND_PREFIX.len();
    let rest = &text[start..];
    let id = &rest[..rest.find('"')?];
    if id.is_empty() {
        return None;
    }
    let mut out = RequestId::new();
    out.push_str(id).ok()?;
    Some(out)
}

fn decode_body(payload: &str) -> Body {
    let decoded = if scan::looks_escaped(payload) {
        scan::unescape(payload)
    } else {
        let mut body = Body::new();
        body.push_str(payload).ok().map(|_| body)
    };
    decoded.unwrap_or_else(|| {
        warn!("Payload of {} bytes does not fit the body buffer", payload.len());
        Body::new()
    })
}

/// Classify one record and extract its id, service name and body
///
/// `None` for records that match no known class.
pub fn classify<'f>(record: &Record<'f>) -> Option<IncomingMessage<'f>> {
    let class = MessageClass::of(record.text)?;
    let body = decode_body(record.payload);

    let (request_id, service) = match class {
        MessageClass::LegacyCommand => (command_id(record.text), None),
        MessageClass::ServiceInvoke => {
            let source = if record.topic.is_empty() { record.text } else { record.topic };
            (scan::find_id(&body), service_name(source))
        }
        _ => (scan::find_id(&body), None),
    };

    Some(IncomingMessage {
        class,
        topic: record.topic,
        request_id,
        service,
        body,
    })
}
