//! Tag canonicalization and the global tag view.

use std::collections::BTreeSet;

use crate::error::{StoreError, StoreResult};
use crate::schema::Conversation;
use crate::store::Store;

/// Trim, drop empties, dedup by exact match keeping first occurrence.
pub fn canonicalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Replace a conversation's tag array and refresh the global tag view
/// eagerly so the next read is served from cache.
pub fn update_tags(
    store: &Store,
    conversation_id: &str,
    tags: &[String],
) -> StoreResult<Conversation> {
    let mut conversation = store
        .get_conversation(conversation_id)?
        .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
    conversation.tags = canonicalize_tags(tags);
    store.upsert_conversation(&conversation)?;
    store.all_tags()?;
    Ok(conversation)
}

/// Membership toggle in a caller-held filter set. Returns whether the tag is
/// in the set afterwards.
pub fn toggle_tag_filter(filter: &mut BTreeSet<String>, tag: &str) -> bool {
    if filter.remove(tag) {
        false
    } else {
        filter.insert(tag.to_string());
        true
    }
}

/// AND semantics: every required tag must be present.
pub fn has_all_tags(conversation: &Conversation, required: &[String]) -> bool {
    required
        .iter()
        .all(|tag| conversation.tags.iter().any(|t| t == tag))
}
