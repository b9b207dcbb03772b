//! Broadcast bus payloads.
//!
//! Delivery is fire-and-forget: events fan out to whoever is subscribed at
//! the moment, and an empty bus is not an error.

use serde::{Deserialize, Serialize};

use chatcentral_store::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Fetching,
    Done,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub status: BatchStatus,
    pub completed: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded ZIP bytes; present once, on `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl BatchProgress {
    pub fn fetching(completed: usize, total: usize) -> Self {
        Self {
            status: BatchStatus::Fetching,
            completed,
            total,
            error: None,
            archive: None,
            filename: None,
        }
    }

    pub fn cancelled(completed: usize, total: usize) -> Self {
        Self {
            status: BatchStatus::Cancelled,
            completed,
            total,
            error: None,
            archive: None,
            filename: None,
        }
    }

    pub fn error(completed: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            status: BatchStatus::Error,
            completed,
            total,
            error: Some(message.into()),
            archive: None,
            filename: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum BroadcastEvent {
    #[serde(rename = "BATCH_FETCH_PROGRESS")]
    BatchProgress(BatchProgress),

    /// A conversation transitioned into `partial` or `full`.
    #[serde(rename = "CONVERSATION_DETAIL_SYNCED")]
    DetailSynced {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Command to the capture clients: replay the detail request for `url`
    /// inside an origin-authenticated context. The response comes back
    /// out-of-band through the normal ingest path.
    #[serde(rename = "FETCH_DETAIL")]
    FetchDetail {
        platform: Platform,
        mode: FetchMode,
        url: String,
    },
}

/// How a capture client should obtain a conversation body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchMode {
    /// Replay the API request from an existing origin tab.
    #[serde(rename = "dispatch-fetch")]
    DispatchFetch,
    /// Drive a (possibly background) tab to the conversation URL and let the
    /// capture hooks observe the traffic.
    #[serde(rename = "navigate")]
    Navigate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_the_action_tag() {
        let event = BroadcastEvent::DetailSynced {
            conversation_id: "claude_x".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "CONVERSATION_DETAIL_SYNCED");
        assert_eq!(json["conversationId"], "claude_x");
    }

    #[test]
    fn progress_serializes_archive_fields_only_when_present() {
        let progress = BatchProgress::fetching(3, 10);
        let json = serde_json::to_value(BroadcastEvent::BatchProgress(progress)).unwrap();
        assert_eq!(json["action"], "BATCH_FETCH_PROGRESS");
        assert_eq!(json["status"], "fetching");
        assert!(json.get("archive").is_none());
    }
}
