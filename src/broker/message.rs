use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::broker::topic::validate_topic;
use crate::config::LimitSettings;
use crate::utils::BusError;

/// A message travelling over the bus.
///
/// The envelope carries the topic, a JSON payload and the metadata the
/// bus needs for retention, request/reply correlation and tracing.
///
/// # Fields
///
/// - `topic` - Concrete dot-separated topic the message is published to.
/// - `data` - JSON payload. Anything `serde_json::Value` can represent.
/// - `id` - Unique message id. Left empty by publishers; the bus stamps it.
/// - `ts` - Publish timestamp in Unix milliseconds. Stamped when zero.
/// - `retain` - When set, the payload is kept as the topic's retained value.
/// - `source` - Identity of the publisher, used for rate accounting.
/// - `reply_to` - Topic a responder should publish its reply to.
/// - `correlation_id` - Opaque id pairing a reply with its request.
/// - `headers` - Free-form string-keyed metadata, not interpreted by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub retain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
}

impl Message {
    /// Creates a message with the given topic and payload.
    ///
    /// Id and timestamp are left unset; the bus stamps them on publish.
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            id: String::new(),
            ts: 0,
            retain: false,
            source: None,
            reply_to: None,
            correlation_id: None,
            headers: None,
        }
    }

    /// Creates a message whose payload will be retained for its topic.
    pub fn retained(topic: impl Into<String>, data: Value) -> Self {
        let mut msg = Self::new(topic, data);
        msg.retain = true;
        msg
    }

    /// Assigns an id and timestamp where the publisher left them unset.
    ///
    /// Ids supplied by the publisher are kept so a forwarded or replayed
    /// message can carry its provenance.
    pub fn stamp(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.ts == 0 {
            self.ts = chrono::Utc::now().timestamp_millis();
        }
    }

    /// Validates the message against the configured limits.
    ///
    /// Checks the topic shape, then the encoded payload size, then the
    /// encoded size of the whole envelope.
    pub fn validate(&self, limits: &LimitSettings) -> Result<(), BusError> {
        validate_topic(&self.topic)?;

        let payload_len = serde_json::to_vec(&self.data)
            .map_err(|e| BusError::MessageInvalid(format!("payload is not serializable: {e}")))?
            .len();
        if payload_len > limits.max_payload_bytes {
            return Err(BusError::MessageInvalid(format!(
                "payload is {payload_len} bytes, limit is {}",
                limits.max_payload_bytes
            )));
        }

        let total_len = serde_json::to_vec(self)
            .map_err(|e| BusError::MessageInvalid(format!("envelope is not serializable: {e}")))?
            .len();
        if total_len > limits.max_message_bytes {
            return Err(BusError::MessageInvalid(format!(
                "message is {total_len} bytes, limit is {}",
                limits.max_message_bytes
            )));
        }

        Ok(())
    }
}
