//! Combines an incoming normalized record with whatever the store already
//! holds for the same identity, and applies detail updates (conversation +
//! message batches) produced by the capture path.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::schema::{Conversation, DetailStatus, Message, Platform, Role};
use crate::store::Store;

/// Gemini sometimes leaks an internal conversation handle into the title
/// field, e.g. `rc_7ab3c`.
static INTERNAL_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(r|rc|c)_[a-z0-9]+$").expect("valid pattern"));

/// Preview text keeps roughly the first 200 chars of leading content.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailMode {
    Full,
    Partial,
}

impl DetailMode {
    fn status(self) -> DetailStatus {
        match self {
            DetailMode::Full => DetailStatus::Full,
            DetailMode::Partial => DetailStatus::Partial,
        }
    }
}

/// Result of applying a detail update.
#[derive(Debug, Clone)]
pub struct DetailOutcome {
    pub conversation: Conversation,
    /// Messages that were not previously stored.
    pub new_messages: usize,
    /// Whether `detailStatus` advanced to a higher rank, which is what
    /// triggers the detail-synced broadcast.
    pub advanced: bool,
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn max_option(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// True when an incoming Gemini title should not replace the existing one:
/// the incoming value is an internal handle, a prefix echo of the first
/// message, or a suspiciously short replacement.
fn gemini_title_guard(existing: &Conversation, incoming: &Conversation) -> bool {
    if existing.platform != Platform::Gemini
        || existing.title.is_empty()
        || incoming.title.is_empty()
    {
        return false;
    }
    if INTERNAL_HANDLE.is_match(&incoming.title) {
        return true;
    }
    let title = normalize(&incoming.title);
    let preview = normalize(&incoming.preview);
    if !title.is_empty() && !preview.is_empty() {
        if preview.starts_with(&title) || title.starts_with(&preview) {
            return true;
        }
    }
    incoming.title.chars().count() <= 6 && incoming.title != existing.title
}

/// Merge `incoming` into `existing`, producing the record to persist.
pub fn merge_conversations(
    existing: &Conversation,
    incoming: &Conversation,
    now: i64,
) -> Conversation {
    let mut merged = existing.clone();

    merged.created_at = existing.created_at.min(incoming.created_at);
    merged.updated_at = existing.updated_at.max(incoming.updated_at);
    merged.synced_at = existing.synced_at.max(incoming.synced_at);
    merged.message_count = existing.message_count.max(incoming.message_count);

    merged.is_favorite = existing.is_favorite || incoming.is_favorite;
    merged.favorite_at = if !existing.is_favorite && incoming.is_favorite {
        Some(incoming.favorite_at.unwrap_or(now))
    } else if !merged.is_favorite {
        None
    } else {
        existing.favorite_at
    };

    // Detail lattice. Newer but less complete evidence demotes full to
    // partial rather than discarding the previously captured body.
    let demoted = incoming.updated_at > existing.updated_at
        && existing.detail_status == DetailStatus::Full
        && incoming.detail_status < DetailStatus::Full;
    if demoted {
        merged.detail_status = DetailStatus::Partial;
        merged.detail_synced_at = existing.detail_synced_at;
    } else if incoming.detail_status >= existing.detail_status {
        let advanced = incoming.detail_status > existing.detail_status;
        merged.detail_status = incoming.detail_status;
        merged.detail_synced_at = if advanced {
            max_option(existing.detail_synced_at, incoming.detail_synced_at).or(Some(now))
        } else {
            existing.detail_synced_at.or(incoming.detail_synced_at)
        };
    } else {
        merged.detail_status = existing.detail_status;
        merged.detail_synced_at = existing.detail_synced_at;
    }

    merged.preview = if incoming.updated_at > existing.updated_at && !incoming.preview.is_empty() {
        incoming.preview.clone()
    } else if existing.preview.is_empty() {
        incoming.preview.clone()
    } else {
        existing.preview.clone()
    };

    merged.title = if gemini_title_guard(existing, incoming) {
        existing.title.clone()
    } else if !incoming.title.is_empty() {
        incoming.title.clone()
    } else {
        existing.title.clone()
    };

    // Write-once.
    merged.url = existing.url.clone().or_else(|| incoming.url.clone());

    merged.summary = incoming.summary.clone().or_else(|| existing.summary.clone());

    let mut tags = existing.tags.clone();
    for tag in &incoming.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    merged.tags = tags;

    merged
}

/// Digest used by the Gemini content-dedup rule: two messages with the same
/// role and content in one conversation are the same message.
fn content_digest(message: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update(match message.role {
        Role::User => b"user".as_slice(),
        Role::Assistant => b"assistant".as_slice(),
    });
    hasher.update([0u8]);
    hasher.update(message.content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Apply a detail update `(conversation, messages, mode)` coming from the
/// capture path.
///
/// Messages are committed before the conversation record, so a reader that
/// observes the advanced `detailStatus` also observes every message of the
/// same update.
pub fn apply_detail_update(
    store: &Store,
    incoming: &Conversation,
    messages: &[Message],
    mode: DetailMode,
    now: i64,
) -> StoreResult<DetailOutcome> {
    for message in messages {
        if message.conversation_id != incoming.id {
            return Err(StoreError::Validation(format!(
                "message {} targets conversation {:?}, expected {:?}",
                message.id, message.conversation_id, incoming.id
            )));
        }
    }

    let existing = store.get_conversation(&incoming.id)?;
    let old_rank = existing
        .as_ref()
        .map(|e| e.detail_status.rank())
        .unwrap_or(0);

    let mut merged = match &existing {
        Some(existing) => merge_conversations(existing, incoming, now),
        None => incoming.clone(),
    };
    merged.detail_status = mode.status();
    merged.detail_synced_at = Some(now);

    if messages.is_empty() {
        store.upsert_conversation(&merged)?;
        return Ok(DetailOutcome {
            advanced: merged.detail_status.rank() > old_rank,
            new_messages: 0,
            conversation: merged,
        });
    }

    // Gemini re-emits the same turns under fresh ids; keep the stored id when
    // role and content already match.
    let mut to_upsert: Vec<Message> = Vec::with_capacity(messages.len());
    if merged.platform == Platform::Gemini {
        let stored = store.get_messages_by_conversation(&merged.id)?;
        let known: HashSet<String> = stored.iter().map(content_digest).collect();
        let mut batch_seen = known.clone();
        for message in messages {
            let digest = content_digest(message);
            if known.contains(&digest) {
                continue;
            }
            if !batch_seen.insert(digest) {
                continue;
            }
            to_upsert.push(message.clone());
        }
    } else {
        to_upsert = messages.to_vec();
    }

    let ids: Vec<String> = to_upsert.iter().map(|m| m.id.clone()).collect();
    let already_stored = store.existing_message_ids(&merged.id, &ids)?;
    let fresh: Vec<&Message> = to_upsert
        .iter()
        .filter(|m| !already_stored.contains(&m.id))
        .collect();
    let new_messages = fresh.len();

    match mode {
        DetailMode::Partial => {
            let base = existing.as_ref().map(|e| e.message_count).unwrap_or(0);
            merged.message_count = base + new_messages as u32;
            if let Some(latest) = fresh
                .iter()
                .filter(|m| m.role == Role::User)
                .max_by_key(|m| m.created_at)
            {
                merged.preview = truncate_chars(&latest.content, PREVIEW_CHARS);
            }
        }
        DetailMode::Full => {
            merged.message_count = messages.len() as u32;
            let mut ordered: Vec<&Message> = messages.iter().collect();
            ordered.sort_by_key(|m| m.created_at);
            let lead = ordered
                .iter()
                .find(|m| m.role == Role::User)
                .or_else(|| ordered.first());
            if let Some(message) = lead {
                merged.preview = truncate_chars(&message.content, PREVIEW_CHARS);
            }
        }
    }

    if let Some(latest) = messages.iter().map(|m| m.created_at).max() {
        merged.updated_at = merged.updated_at.max(latest);
    }

    store.upsert_messages(&to_upsert)?;
    store.upsert_conversation(&merged)?;

    Ok(DetailOutcome {
        advanced: merged.detail_status.rank() > old_rank,
        new_messages,
        conversation: merged,
    })
}

/// Batch-merge normalized listing records. Malformed records are skipped with
/// a warning; the rest are stored in one atomic batch.
pub fn apply_listing(store: &Store, records: &[Conversation], now: i64) -> StoreResult<usize> {
    let mut merged_records = Vec::with_capacity(records.len());
    for record in records {
        let merged = match store.get_conversation(&record.id)? {
            Some(existing) => merge_conversations(&existing, record, now),
            None => record.clone(),
        };
        if let Err(err) = merged.validate() {
            warn!(id = %record.id, %err, "skipping malformed listing record");
            continue;
        }
        merged_records.push(merged);
    }
    store.upsert_conversations(&merged_records)?;
    Ok(merged_records.len())
}

/// Toggle (or set) the favorite flag. A toggle that arrives before any body
/// was captured creates a placeholder record.
pub fn toggle_favorite(
    store: &Store,
    conversation_id: &str,
    value: Option<bool>,
    now: i64,
) -> StoreResult<Conversation> {
    let mut conversation = match store.get_conversation(conversation_id)? {
        Some(conversation) => conversation,
        None => {
            let (platform, original_id) = split_conversation_id(conversation_id)?;
            Conversation::new(platform, original_id, now)
        }
    };

    let target = value.unwrap_or(!conversation.is_favorite);
    if target && !conversation.is_favorite {
        conversation.favorite_at = Some(now);
    }
    if !target {
        conversation.favorite_at = None;
    }
    conversation.is_favorite = target;

    store.upsert_conversation(&conversation)?;
    Ok(conversation)
}

/// Split a canonical id back into `(platform, originalId)`.
pub fn split_conversation_id(id: &str) -> StoreResult<(Platform, &str)> {
    let (slug, original_id) = id
        .split_once('_')
        .ok_or_else(|| StoreError::Validation(format!("malformed conversation id {id:?}")))?;
    let platform = Platform::from_slug(slug)
        .ok_or_else(|| StoreError::Validation(format!("unknown platform in id {id:?}")))?;
    if original_id.is_empty() {
        return Err(StoreError::Validation(format!(
            "malformed conversation id {id:?}"
        )));
    }
    Ok((platform, original_id))
}
