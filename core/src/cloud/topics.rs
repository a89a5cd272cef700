//! OneNET topic names
//!
//! Every topic lives under `$sys/{product_id}/{device_name}/`. Publish
//! topics are built on demand into a bounded buffer.

use heapless::String;

use super::CloudError;

/// Maximum topic length
///
/// `$sys/` (5) + product id (~10) + device name (up to 64) + longest
/// suffix (~50) fits comfortably.
pub const MAX_TOPIC_LEN: usize = 160;

pub type TopicBuf = String<MAX_TOPIC_LEN>;

pub const PROPERTY_POST: &str = "thing/property/post";
pub const PROPERTY_POST_REPLY: &str = "thing/property/post/reply";
pub const EVENT_POST: &str = "thing/event/post";
pub const PROPERTY_SET: &str = "thing/property/set";
pub const PROPERTY_SET_REPLY: &str = "thing/property/set_reply";
pub const SERVICE_INVOKE_ALL: &str = "thing/service/+/invoke";
pub const PROPERTY_GET: &str = "thing/property/get";
pub const PROPERTY_GET_REPLY: &str = "thing/property/get_reply";
pub const DESIRED_GET: &str = "thing/property/desired/get";
pub const DESIRED_GET_REPLY: &str = "thing/property/desired/get/reply";
pub const COMMAND_REQUEST_ALL: &str = "cmd/request/+";

/// Topic filters subscribed during bring-up, in order
pub const SUBSCRIPTIONS: [&str; 6] = [
    PROPERTY_SET,
    SERVICE_INVOKE_ALL,
    PROPERTY_GET,
    DESIRED_GET_REPLY,
    PROPERTY_POST_REPLY,
    COMMAND_REQUEST_ALL,
];

fn has_wildcard(part: &str) -> bool {
    part.contains('+') || part.contains('#') || part.contains('\0')
}

/// Builds topics for one device
#[derive(Debug, Clone, Copy)]
pub struct Topics<'c> {
    product_id: &'c str,
    device_name: &'c str,
}

impl<'c> Topics<'c> {
    /// Fails if either identifier contains an MQTT wildcard or NUL
    pub fn new(product_id: &'c str, device_name: &'c str) -> Result<Self, CloudError> {
        if has_wildcard(product_id) || has_wildcard(device_name) {
            error!("Product id or device name contains invalid MQTT topic characters");
            return Err(CloudError::InvalidTopic);
        }
        Ok(Self {
            product_id,
            device_name,
        })
    }

    /// `$sys/{pid}/{dev}/{suffix}`
    ///
    /// Also used for subscription filters, so the suffix may carry `+`.
    pub fn topic(&self, suffix: &str) -> Result<TopicBuf, CloudError> {
        self.build(&[suffix])
    }

    /// `$sys/{pid}/{dev}/thing/service/{service}/invoke_reply`
    pub fn invoke_reply(&self, service: &str) -> Result<TopicBuf, CloudError> {
        if service.is_empty() || service.contains('/') || has_wildcard(service) {
            return Err(CloudError::InvalidTopic);
        }
        self.build(&["thing/service/", service, "/invoke_reply"])
    }

    /// `$sys/{pid}/{dev}/cmd/response/{id}`
    pub fn command_response(&self, id: &str) -> Result<TopicBuf, CloudError> {
        if id.is_empty() || has_wildcard(id) {
            return Err(CloudError::InvalidTopic);
        }
        self.build(&["cmd/response/", id])
    }

    fn build(&self, parts: &[&str]) -> Result<TopicBuf, CloudError> {
        let mut topic = TopicBuf::new();
        for part in ["$sys/", self.product_id, "/", self.device_name, "/"]
            .iter()
            .chain(parts)
        {
            topic.push_str(part).map_err(|_| CloudError::TopicTooLong)?;
        }
        Ok(topic)
    }
}
