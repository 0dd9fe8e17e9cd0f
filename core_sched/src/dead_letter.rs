use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{MessageId, StoreError, StreamTransport};

/// Stream message that will not be retried again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message_id: String,
    pub stream: String,
    pub group: String,
    pub delivery_count: u32,
    pub reason: String,
    pub body: String,
}

impl DeadLetter {
    pub fn new(
        message_id: MessageId,
        stream: &str,
        group: &str,
        delivery_count: u32,
        reason: impl Into<String>,
        body: &[u8],
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            stream: stream.to_string(),
            group: group.to_string(),
            delivery_count,
            reason: reason.into(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Destination for messages that exhausted their deliveries.
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, letter: &DeadLetter) -> Result<(), StoreError>;
}

/// Appends dead letters as JSON to their own stream.
pub struct StreamDeadLetterSink {
    transport: Arc<dyn StreamTransport>,
    stream_key: String,
}

impl StreamDeadLetterSink {
    pub fn new(transport: Arc<dyn StreamTransport>, stream_key: impl Into<String>) -> Self {
        Self {
            transport,
            stream_key: stream_key.into(),
        }
    }
}

impl DeadLetterSink for StreamDeadLetterSink {
    fn record(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(letter)
            .map_err(|err| StoreError::Unavailable(format!("dead letter encoding: {}", err)))?;
        self.transport.append(&self.stream_key, &bytes)?;
        Ok(())
    }
}
