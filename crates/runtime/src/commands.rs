//! The validated request/response contract of the dispatch surface.
//!
//! Every request carries an `action` tag. Validation is the typed parse:
//! an unknown action or a payload that does not match its declared schema
//! fails to deserialize, and the caller receives
//! `{"success": false, "error": "Invalid message format"}` with no side
//! effects.

use serde::{Deserialize, Serialize};

use chatcentral_search::MatchSnippet;
use chatcentral_store::{Conversation, Message, Platform};

use crate::ingest::CapturePayload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    #[serde(rename = "CAPTURE_API_RESPONSE")]
    CaptureApiResponse {
        url: String,
        data: CapturePayload,
        ts: i64,
    },

    #[serde(rename = "GET_CONVERSATIONS")]
    GetConversations {
        #[serde(default)]
        platform: Option<Platform>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },

    #[serde(rename = "GET_MESSAGES")]
    GetMessages {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    #[serde(rename = "GET_STATS")]
    GetStats {},

    #[serde(rename = "SEARCH")]
    Search {
        query: String,
        #[serde(default)]
        filters: Option<SearchFilters>,
    },

    #[serde(rename = "SEARCH_WITH_MATCHES")]
    SearchWithMatches {
        query: String,
        #[serde(default)]
        limit: Option<usize>,
    },

    #[serde(rename = "GET_RECENT_CONVERSATIONS")]
    GetRecentConversations {
        #[serde(default)]
        limit: Option<usize>,
    },

    #[serde(rename = "TOGGLE_FAVORITE")]
    ToggleFavorite {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(default)]
        value: Option<bool>,
    },

    #[serde(rename = "UPDATE_TAGS")]
    UpdateTags {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        tags: Vec<String>,
    },

    #[serde(rename = "GET_ALL_TAGS")]
    GetAllTags {},

    #[serde(rename = "BATCH_FETCH_AND_EXPORT")]
    BatchFetchAndExport {
        platform: Platform,
        #[serde(default)]
        limit: Option<usize>,
    },

    #[serde(rename = "BATCH_FETCH_CANCEL")]
    BatchFetchCancel {},

    /// Control verb: turn this connection into a broadcast listener.
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {},

    /// Control verb: ask the daemon to exit gracefully.
    #[serde(rename = "SHUTDOWN")]
    Shutdown {},
}

/// Extra constraints applied on top of the parsed query operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub favorite_only: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

// ── replies ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationsReply {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesReply {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchReply {
    pub results: Vec<Conversation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultEntry {
    pub conversation: Conversation,
    pub matches: Vec<MatchSnippet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchWithMatchesReply {
    pub results: Vec<SearchResultEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagsReply {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceptedReply {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub success: bool,
    pub error: String,
}

impl ErrorReply {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_parse_by_action_tag() {
        let request: Request = serde_json::from_str(
            r#"{"action":"TOGGLE_FAVORITE","conversationId":"claude_x","value":true}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            Request::ToggleFavorite {
                conversation_id: "claude_x".to_string(),
                value: Some(true),
            }
        );
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        assert!(serde_json::from_str::<Request>(r#"{"action":"NOT_A_VERB"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"no_action":true}"#).is_err());
    }

    #[test]
    fn payload_schema_mismatch_fails_to_parse() {
        // tags must be an array of strings
        assert!(serde_json::from_str::<Request>(
            r#"{"action":"UPDATE_TAGS","conversationId":"claude_x","tags":"oops"}"#
        )
        .is_err());
        // platform must come from the closed set
        assert!(serde_json::from_str::<Request>(
            r#"{"action":"BATCH_FETCH_AND_EXPORT","platform":"slack"}"#
        )
        .is_err());
    }

    #[test]
    fn optional_fields_default() {
        let request: Request = serde_json::from_str(r#"{"action":"GET_CONVERSATIONS"}"#).unwrap();
        assert_eq!(
            request,
            Request::GetConversations {
                platform: None,
                limit: None,
                offset: None,
            }
        );
    }
}
