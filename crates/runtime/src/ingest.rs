//! Capture ingestion: normalized records observed at the chat origins enter
//! the store here.
//!
//! The per-site response parsers are external; by the time traffic reaches
//! this module it is already normalized into listing batches or detail
//! updates. The raw request URL still matters for one thing: Claude org-id
//! harvesting.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use chatcentral_store::{
    apply_detail_update, apply_listing, Conversation, DetailMode, Message, Store,
    KV_CLAUDE_ORG_ID,
};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Full,
    Partial,
}

impl CaptureMode {
    fn detail_mode(self) -> DetailMode {
        match self {
            CaptureMode::Full => DetailMode::Full,
            CaptureMode::Partial => DetailMode::Partial,
        }
    }
}

/// Normalized capture payloads the dispatch surface accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CapturePayload {
    /// A conversation index page: metadata only, no bodies.
    Listing { conversations: Vec<Conversation> },
    /// A conversation body: the record plus its messages.
    Detail {
        conversation: Conversation,
        #[serde(default)]
        messages: Vec<Message>,
        mode: CaptureMode,
    },
}

#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Records written by this capture.
    pub stored: usize,
    /// Conversations whose detail status advanced, in need of a
    /// `CONVERSATION_DETAIL_SYNCED` broadcast.
    pub detail_synced: Vec<String>,
}

/// Pull the org uuid out of a Claude API URL of the shape
/// `/api/organizations/<uuid>/…`.
pub fn extract_claude_org_id(raw_url: &str) -> Option<String> {
    let url = Url::parse(raw_url).ok()?;
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "organizations" {
            let candidate = segments.next()?;
            return Uuid::parse_str(candidate).ok().map(|_| candidate.to_string());
        }
    }
    None
}

/// Apply one captured response to the store.
pub fn ingest_capture(
    store: &Store,
    url: &str,
    payload: &CapturePayload,
    now: i64,
) -> Result<IngestOutcome, RuntimeError> {
    if let Some(org_id) = extract_claude_org_id(url) {
        let known: Option<String> = store.kv_get(KV_CLAUDE_ORG_ID)?;
        if known.as_deref() != Some(org_id.as_str()) {
            debug!(org_id = %org_id, "storing claude org hint");
            store.kv_put(KV_CLAUDE_ORG_ID, &org_id)?;
        }
    }

    let mut outcome = IngestOutcome::default();
    match payload {
        CapturePayload::Listing { conversations } => {
            outcome.stored = apply_listing(store, conversations, now)?;
            debug!(url, stored = outcome.stored, "listing capture applied");
        }
        CapturePayload::Detail {
            conversation,
            messages,
            mode,
        } => {
            let detail =
                apply_detail_update(store, conversation, messages, mode.detail_mode(), now)?;
            outcome.stored = 1 + detail.new_messages;
            if detail.advanced {
                outcome.detail_synced.push(detail.conversation.id.clone());
            }
            debug!(
                url,
                id = %detail.conversation.id,
                new_messages = detail.new_messages,
                advanced = detail.advanced,
                "detail capture applied"
            );
        }
    }
    Ok(outcome)
}
