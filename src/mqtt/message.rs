//! Inbound message representation

use chrono::{DateTime, Local};
use std::fmt;

const PREVIEW_LEN: usize = 48;

/// One publish received from the broker, stamped on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
    received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            received_at: Local::now(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    /// Lossy text rendering of the payload, truncated for log lines
    pub fn payload_preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        let mut preview: String = text.chars().take(PREVIEW_LEN).collect();
        if text.chars().count() > PREVIEW_LEN {
            preview.push_str("...");
        }
        preview
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload_preview()
        )
    }
}
