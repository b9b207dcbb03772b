//! Embedded persistence over redb.
//!
//! Secondary indices are plain tables with ordered composite keys, maintained
//! in the same write transaction as the primary row. That transaction is the
//! atomicity unit: every public write operation is exactly one commit.
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | `conversations` | id | JSON `Conversation` |
//! | `conv_by_updated` | (updated_at, id) | — |
//! | `conv_by_platform` | (platform, updated_at, id) | — |
//! | `conv_favorites` | (favorite_at, id) | — |
//! | `messages` | (conversation_id, id) | JSON `Message` |
//! | `msg_by_created` | (conversation_id, created_at, id) | — |
//! | `kv` | key | JSON value |

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreResult;
use crate::schema::{Conversation, ConversationFilter, ConversationOrder, Message, Page, Platform};

const CONVERSATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("conversations");
const CONV_BY_UPDATED: TableDefinition<(u64, &str), ()> = TableDefinition::new("conv_by_updated");
const CONV_BY_PLATFORM: TableDefinition<(&str, u64, &str), ()> =
    TableDefinition::new("conv_by_platform");
const CONV_FAVORITES: TableDefinition<(u64, &str), ()> = TableDefinition::new("conv_favorites");
const MESSAGES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("messages");
const MSG_BY_CREATED: TableDefinition<(&str, u64, &str), ()> =
    TableDefinition::new("msg_by_created");
const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Singleton keys in the `kv` table.
pub const KV_CLAUDE_ORG_ID: &str = "claude_org_id";
pub const KV_WIDGET_ENABLED: &str = "config.widget.enabled";
pub const KV_THEME: &str = "config.theme";
pub const KV_LAST_EXPORT_STATS: &str = "last_export_stats";

/// Hot conversations held fully decoded.
const LRU_CAPACITY: usize = 256;

/// Index keys are unsigned; clamp the (realistically always positive)
/// millisecond timestamps.
fn ts_key(ts: i64) -> u64 {
    ts.max(0) as u64
}

/// Snapshot of the conversation cache counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub capacity: usize,
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub by_platform: BTreeMap<String, u64>,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

struct CacheState {
    entries: LruCache<String, Conversation>,
    hits: u64,
    misses: u64,
}

pub struct Store {
    db: Database,
    path: PathBuf,
    cache: Mutex<CacheState>,
    /// Sorted union of all tag arrays. `None` means dirty.
    tag_view: Mutex<Option<Vec<String>>>,
}

impl Store {
    /// Open (or create) the store file at `path`, ensuring all tables exist.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)?;

        {
            let tx = db.begin_write()?;
            tx.open_table(CONVERSATIONS)?;
            tx.open_table(CONV_BY_UPDATED)?;
            tx.open_table(CONV_BY_PLATFORM)?;
            tx.open_table(CONV_FAVORITES)?;
            tx.open_table(MESSAGES)?;
            tx.open_table(MSG_BY_CREATED)?;
            tx.open_table(KV)?;
            tx.commit()?;
        }

        info!(path = %path.display(), "opened conversation store");

        Ok(Self {
            db,
            path,
            cache: Mutex::new(CacheState {
                entries: LruCache::new(NonZeroUsize::new(LRU_CAPACITY).expect("nonzero")),
                hits: 0,
                misses: 0,
            }),
            tag_view: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── conversations ────────────────────────────────────────────────────────

    pub fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        {
            let mut cache = self.lock_cache();
            if let Some(hit) = cache.entries.get(id).cloned() {
                cache.hits += 1;
                return Ok(Some(hit));
            }
            cache.misses += 1;
        }

        let tx = self.db.begin_read()?;
        let table = tx.open_table(CONVERSATIONS)?;
        let Some(guard) = table.get(id)? else {
            return Ok(None);
        };
        let conversation: Conversation = serde_json::from_slice(guard.value())?;
        self.lock_cache()
            .entries
            .put(id.to_string(), conversation.clone());
        Ok(Some(conversation))
    }

    pub fn upsert_conversation(&self, conversation: &Conversation) -> StoreResult<()> {
        self.upsert_conversations(std::slice::from_ref(conversation))
    }

    /// Atomic batch replace-by-id. Index rows for prior versions are removed
    /// in the same transaction.
    pub fn upsert_conversations(&self, records: &[Conversation]) -> StoreResult<()> {
        for record in records {
            record.validate()?;
        }

        let tx = self.db.begin_write()?;
        {
            let mut conversations = tx.open_table(CONVERSATIONS)?;
            let mut by_updated = tx.open_table(CONV_BY_UPDATED)?;
            let mut by_platform = tx.open_table(CONV_BY_PLATFORM)?;
            let mut favorites = tx.open_table(CONV_FAVORITES)?;

            for record in records {
                let old: Option<Conversation> = conversations
                    .get(record.id.as_str())?
                    .map(|guard| serde_json::from_slice(guard.value()))
                    .transpose()?;
                if let Some(old) = &old {
                    by_updated.remove((ts_key(old.updated_at), old.id.as_str()))?;
                    by_platform.remove((
                        old.platform.slug(),
                        ts_key(old.updated_at),
                        old.id.as_str(),
                    ))?;
                    if let Some(favorite_at) = old.favorite_at {
                        favorites.remove((ts_key(favorite_at), old.id.as_str()))?;
                    }
                }

                let bytes = serde_json::to_vec(record)?;
                conversations.insert(record.id.as_str(), bytes.as_slice())?;
                by_updated.insert((ts_key(record.updated_at), record.id.as_str()), ())?;
                by_platform.insert(
                    (
                        record.platform.slug(),
                        ts_key(record.updated_at),
                        record.id.as_str(),
                    ),
                    (),
                )?;
                if let Some(favorite_at) = record.favorite_at {
                    favorites.insert((ts_key(favorite_at), record.id.as_str()), ())?;
                }
            }
        }
        tx.commit()?;

        let mut cache = self.lock_cache();
        for record in records {
            cache.entries.put(record.id.clone(), record.clone());
        }
        drop(cache);
        self.invalidate_tag_view();
        Ok(())
    }

    pub fn list_conversations(
        &self,
        filter: &ConversationFilter,
        order: ConversationOrder,
        page: Page,
    ) -> StoreResult<Vec<Conversation>> {
        let tx = self.db.begin_read()?;
        let conversations = tx.open_table(CONVERSATIONS)?;

        let ids = match (order, filter.platform) {
            (ConversationOrder::FavoriteDesc, _) => {
                let favorites = tx.open_table(CONV_FAVORITES)?;
                let mut ids = Vec::new();
                for row in favorites.iter()?.rev() {
                    let (key, _) = row?;
                    ids.push(key.value().1.to_string());
                }
                ids
            }
            (ConversationOrder::UpdatedDesc, Some(platform)) => {
                let by_platform = tx.open_table(CONV_BY_PLATFORM)?;
                let slug = platform.slug();
                let mut ids = Vec::new();
                for row in by_platform.range((slug, 0u64, "")..)?.rev() {
                    let (key, _) = row?;
                    let (key_slug, _, id) = key.value();
                    if key_slug != slug {
                        // reverse scan: rows of later platforms precede ours
                        continue;
                    }
                    ids.push(id.to_string());
                }
                ids
            }
            (ConversationOrder::UpdatedDesc, None) => {
                let by_updated = tx.open_table(CONV_BY_UPDATED)?;
                let mut ids = Vec::new();
                for row in by_updated.iter()?.rev() {
                    let (key, _) = row?;
                    ids.push(key.value().1.to_string());
                }
                ids
            }
        };

        let mut skipped = 0usize;
        let mut out = Vec::new();
        for id in ids {
            if out.len() >= page.limit {
                break;
            }
            let Some(guard) = conversations.get(id.as_str())? else {
                continue;
            };
            let conversation: Conversation = serde_json::from_slice(guard.value())?;
            if !filter.matches(&conversation) {
                continue;
            }
            if skipped < page.offset {
                skipped += 1;
                continue;
            }
            out.push(conversation);
        }
        Ok(out)
    }

    pub fn count_conversations(&self, filter: &ConversationFilter) -> StoreResult<u64> {
        let tx = self.db.begin_read()?;

        // Unfiltered count is a metadata read.
        if filter.platform.is_none() && !filter.favorite_only && filter.date_range.is_none() {
            let conversations = tx.open_table(CONVERSATIONS)?;
            return Ok(conversations.len()?);
        }

        // Platform-only count never decodes records.
        if let (Some(platform), false, None) =
            (filter.platform, filter.favorite_only, &filter.date_range)
        {
            let by_platform = tx.open_table(CONV_BY_PLATFORM)?;
            let slug = platform.slug();
            let mut count = 0u64;
            for row in by_platform.range((slug, 0u64, "")..)? {
                let (key, _) = row?;
                if key.value().0 != slug {
                    break;
                }
                count += 1;
            }
            return Ok(count);
        }

        let conversations = tx.open_table(CONVERSATIONS)?;
        let mut count = 0u64;
        for row in conversations.iter()? {
            let (_, value) = row?;
            let conversation: Conversation = serde_json::from_slice(value.value())?;
            if filter.matches(&conversation) {
                count += 1;
            }
        }
        Ok(count)
    }

    // ── messages ─────────────────────────────────────────────────────────────

    /// All messages of a conversation, `createdAt` ascending.
    ///
    /// Gemini conversations ingested before the id scheme settled may hold
    /// their rows under a legacy twin id (`c_X` ↔ `X`). When the load comes
    /// back empty and the twin has rows, they are moved under the requested id
    /// in one transaction before returning.
    pub fn get_messages_by_conversation(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let messages = self.read_messages(conversation_id)?;
        if !messages.is_empty() {
            return Ok(messages);
        }
        let Some(twin) = gemini_legacy_twin(conversation_id) else {
            return Ok(messages);
        };
        let legacy = self.read_messages(&twin)?;
        if legacy.is_empty() {
            return Ok(messages);
        }

        info!(
            from = %twin,
            to = %conversation_id,
            count = legacy.len(),
            "repairing gemini legacy message rows"
        );
        let mut repaired = Vec::with_capacity(legacy.len());
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(MESSAGES)?;
            let mut by_created = tx.open_table(MSG_BY_CREATED)?;
            for message in &legacy {
                table.remove((twin.as_str(), message.id.as_str()))?;
                by_created.remove((
                    twin.as_str(),
                    ts_key(message.created_at),
                    message.id.as_str(),
                ))?;

                let mut moved = message.clone();
                moved.conversation_id = conversation_id.to_string();
                let bytes = serde_json::to_vec(&moved)?;
                table.insert((conversation_id, moved.id.as_str()), bytes.as_slice())?;
                by_created.insert(
                    (conversation_id, ts_key(moved.created_at), moved.id.as_str()),
                    (),
                )?;
                repaired.push(moved);
            }
        }
        tx.commit()?;
        Ok(repaired)
    }

    fn read_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(MESSAGES)?;
        let by_created = tx.open_table(MSG_BY_CREATED)?;

        let mut out = Vec::new();
        for row in by_created.range((conversation_id, 0u64, "")..)? {
            let (key, _) = row?;
            let (key_conv, _, id) = key.value();
            if key_conv != conversation_id {
                break;
            }
            if let Some(guard) = table.get((conversation_id, id))? {
                out.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(out)
    }

    pub fn get_messages_by_ids(
        &self,
        conversation_id: &str,
        ids: &[String],
    ) -> StoreResult<HashMap<String, Message>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(MESSAGES)?;
        let mut out = HashMap::new();
        for id in ids {
            if let Some(guard) = table.get((conversation_id, id.as_str()))? {
                let message: Message = serde_json::from_slice(guard.value())?;
                out.insert(id.clone(), message);
            }
        }
        Ok(out)
    }

    pub fn existing_message_ids(
        &self,
        conversation_id: &str,
        ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(MESSAGES)?;
        let mut out = HashSet::new();
        for id in ids {
            if table.get((conversation_id, id.as_str()))?.is_some() {
                out.insert(id.clone());
            }
        }
        Ok(out)
    }

    /// Atomic batch upsert keyed by `(conversationId, id)`.
    pub fn upsert_messages(&self, records: &[Message]) -> StoreResult<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(MESSAGES)?;
            let mut by_created = tx.open_table(MSG_BY_CREATED)?;
            for record in records {
                let key = (record.conversation_id.as_str(), record.id.as_str());
                let old: Option<Message> = table
                    .get(key)?
                    .map(|guard| serde_json::from_slice(guard.value()))
                    .transpose()?;
                if let Some(old) = &old {
                    by_created.remove((
                        old.conversation_id.as_str(),
                        ts_key(old.created_at),
                        old.id.as_str(),
                    ))?;
                }
                let bytes = serde_json::to_vec(record)?;
                table.insert(key, bytes.as_slice())?;
                by_created.insert(
                    (
                        record.conversation_id.as_str(),
                        ts_key(record.created_at),
                        record.id.as_str(),
                    ),
                    (),
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_messages_by_conversation(&self, conversation_id: &str) -> StoreResult<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(MESSAGES)?;
            let mut by_created = tx.open_table(MSG_BY_CREATED)?;
            let keys: Vec<(u64, String)> = {
                let mut keys = Vec::new();
                for row in by_created.range((conversation_id, 0u64, "")..)? {
                    let (key, _) = row?;
                    let (key_conv, created, id) = key.value();
                    if key_conv != conversation_id {
                        break;
                    }
                    keys.push((created, id.to_string()));
                }
                keys
            };
            for (created, id) in keys {
                table.remove((conversation_id, id.as_str()))?;
                by_created.remove((conversation_id, created, id.as_str()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ── bulk clears ──────────────────────────────────────────────────────────

    /// Delete a platform's conversations and their messages in one atomic step.
    pub fn clear_platform(&self, platform: Platform) -> StoreResult<u64> {
        let slug = platform.slug();
        let tx = self.db.begin_write()?;
        let removed;
        {
            let mut conversations = tx.open_table(CONVERSATIONS)?;
            let mut by_updated = tx.open_table(CONV_BY_UPDATED)?;
            let mut by_platform = tx.open_table(CONV_BY_PLATFORM)?;
            let mut favorites = tx.open_table(CONV_FAVORITES)?;
            let mut messages = tx.open_table(MESSAGES)?;
            let mut by_created = tx.open_table(MSG_BY_CREATED)?;

            let ids: Vec<(u64, String)> = {
                let mut ids = Vec::new();
                for row in by_platform.range((slug, 0u64, "")..)? {
                    let (key, _) = row?;
                    let (key_slug, updated, id) = key.value();
                    if key_slug != slug {
                        break;
                    }
                    ids.push((updated, id.to_string()));
                }
                ids
            };
            removed = ids.len() as u64;

            for (updated, id) in ids {
                let record: Option<Conversation> = conversations
                    .remove(id.as_str())?
                    .map(|guard| serde_json::from_slice(guard.value()))
                    .transpose()?;
                by_updated.remove((updated, id.as_str()))?;
                by_platform.remove((slug, updated, id.as_str()))?;
                if let Some(favorite_at) = record.and_then(|r| r.favorite_at) {
                    favorites.remove((ts_key(favorite_at), id.as_str()))?;
                }

                let message_keys: Vec<(u64, String)> = {
                    let mut keys = Vec::new();
                    for row in by_created.range((id.as_str(), 0u64, "")..)? {
                        let (key, _) = row?;
                        let (key_conv, created, message_id) = key.value();
                        if key_conv != id {
                            break;
                        }
                        keys.push((created, message_id.to_string()));
                    }
                    keys
                };
                for (created, message_id) in message_keys {
                    messages.remove((id.as_str(), message_id.as_str()))?;
                    by_created.remove((id.as_str(), created, message_id.as_str()))?;
                }
            }
        }
        tx.commit()?;

        self.lock_cache().entries.clear();
        self.invalidate_tag_view();
        info!(platform = slug, removed, "cleared platform");
        Ok(removed)
    }

    pub fn clear_all(&self) -> StoreResult<()> {
        let tx = self.db.begin_write()?;
        tx.delete_table(CONVERSATIONS)?;
        tx.delete_table(CONV_BY_UPDATED)?;
        tx.delete_table(CONV_BY_PLATFORM)?;
        tx.delete_table(CONV_FAVORITES)?;
        tx.delete_table(MESSAGES)?;
        tx.delete_table(MSG_BY_CREATED)?;
        tx.open_table(CONVERSATIONS)?;
        tx.open_table(CONV_BY_UPDATED)?;
        tx.open_table(CONV_BY_PLATFORM)?;
        tx.open_table(CONV_FAVORITES)?;
        tx.open_table(MESSAGES)?;
        tx.open_table(MSG_BY_CREATED)?;
        tx.commit()?;

        self.lock_cache().entries.clear();
        self.invalidate_tag_view();
        info!("cleared all conversation data");
        Ok(())
    }

    // ── tag view ─────────────────────────────────────────────────────────────

    /// Sorted, deduplicated union of every conversation's tags. Served from a
    /// cached view that write paths invalidate.
    pub fn all_tags(&self) -> StoreResult<Vec<String>> {
        {
            let view = self.lock_tag_view();
            if let Some(tags) = view.as_ref() {
                return Ok(tags.clone());
            }
        }

        let tx = self.db.begin_read()?;
        let conversations = tx.open_table(CONVERSATIONS)?;
        let mut union = BTreeSet::new();
        for row in conversations.iter()? {
            let (_, value) = row?;
            let conversation: Conversation = serde_json::from_slice(value.value())?;
            union.extend(conversation.tags);
        }
        let tags: Vec<String> = union.into_iter().collect();
        *self.lock_tag_view() = Some(tags.clone());
        Ok(tags)
    }

    pub(crate) fn invalidate_tag_view(&self) {
        *self.lock_tag_view() = None;
    }

    // ── kv singletons ────────────────────────────────────────────────────────

    pub fn kv_get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(KV)?;
        match table.get(key)? {
            None => Ok(None),
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        }
    }

    pub fn kv_put<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV)?;
            table.insert(key, bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> StoreResult<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV)?;
            table.remove(key)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── stats ────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> StoreResult<StoreStats> {
        let tx = self.db.begin_read()?;
        let conversations = tx.open_table(CONVERSATIONS)?;
        let messages = tx.open_table(MESSAGES)?;
        let by_updated = tx.open_table(CONV_BY_UPDATED)?;
        let by_platform = tx.open_table(CONV_BY_PLATFORM)?;

        let mut platform_counts = BTreeMap::new();
        for platform in Platform::ALL {
            let slug = platform.slug();
            let mut count = 0u64;
            for row in by_platform.range((slug, 0u64, "")..)? {
                let (key, _) = row?;
                if key.value().0 != slug {
                    break;
                }
                count += 1;
            }
            platform_counts.insert(slug.to_string(), count);
        }

        let oldest = by_updated
            .first()?
            .map(|(key, _)| key.value().0 as i64);
        let newest = by_updated
            .last()?
            .map(|(key, _)| key.value().0 as i64);

        Ok(StoreStats {
            total_conversations: conversations.len()?,
            total_messages: messages.len()?,
            by_platform: platform_counts,
            oldest,
            newest,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.lock_cache();
        CacheStats {
            capacity: LRU_CAPACITY,
            len: cache.entries.len(),
            hits: cache.hits,
            misses: cache.misses,
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tag_view(&self) -> std::sync::MutexGuard<'_, Option<Vec<String>>> {
        self.tag_view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The other spelling of a Gemini conversation id (`c_X` ↔ `X`), if any.
fn gemini_legacy_twin(conversation_id: &str) -> Option<String> {
    let original = conversation_id.strip_prefix("gemini_")?;
    match original.strip_prefix("c_") {
        Some(bare) if !bare.is_empty() => Some(format!("gemini_{bare}")),
        Some(_) => None,
        None => Some(format!("gemini_c_{original}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DateRange, Role};

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        (dir, store)
    }

    fn conversation(platform: Platform, original_id: &str, updated_at: i64) -> Conversation {
        let mut c = Conversation::new(platform, original_id, 100);
        c.title = format!("conversation {original_id}");
        c.updated_at = updated_at;
        c
    }

    fn message(conversation_id: &str, id: &str, role: Role, content: &str, at: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: at,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (_dir, store) = open_store();
        let c = conversation(Platform::Claude, "abc", 1_000);
        store.upsert_conversation(&c).unwrap();
        let loaded = store.get_conversation("claude_abc").unwrap().unwrap();
        assert_eq!(loaded, c);
        assert_eq!(store.get_conversation("claude_missing").unwrap(), None);
    }

    #[test]
    fn upsert_rejects_invalid_records() {
        let (_dir, store) = open_store();
        let mut c = conversation(Platform::Claude, "abc", 1_000);
        c.id = "gemini_abc".to_string();
        assert!(store.upsert_conversation(&c).is_err());
        assert_eq!(store.get_conversation("gemini_abc").unwrap(), None);
    }

    #[test]
    fn list_orders_by_updated_desc_and_pages() {
        let (_dir, store) = open_store();
        for (i, ts) in [(1, 1_000), (2, 3_000), (3, 2_000)] {
            store
                .upsert_conversation(&conversation(Platform::Claude, &format!("c{i}"), ts))
                .unwrap();
        }

        let all = store
            .list_conversations(
                &ConversationFilter::default(),
                ConversationOrder::UpdatedDesc,
                Page::all(),
            )
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["claude_c2", "claude_c3", "claude_c1"]);

        // limit+1 convention: ask for 2 to learn there is more after the first
        let page = store
            .list_conversations(
                &ConversationFilter::default(),
                ConversationOrder::UpdatedDesc,
                Page::new(0, 2),
            )
            .unwrap();
        assert_eq!(page.len(), 2);
        let rest = store
            .list_conversations(
                &ConversationFilter::default(),
                ConversationOrder::UpdatedDesc,
                Page::new(2, 2),
            )
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn list_filters_by_platform_favorite_and_date() {
        let (_dir, store) = open_store();
        store
            .upsert_conversation(&conversation(Platform::Claude, "a", 1_000))
            .unwrap();
        let mut favorite = conversation(Platform::Gemini, "b", 2_000);
        favorite.is_favorite = true;
        favorite.favorite_at = Some(2_500);
        store.upsert_conversation(&favorite).unwrap();

        let filter = ConversationFilter {
            platform: Some(Platform::Gemini),
            ..Default::default()
        };
        let gemini_only = store
            .list_conversations(&filter, ConversationOrder::UpdatedDesc, Page::all())
            .unwrap();
        assert_eq!(gemini_only.len(), 1);
        assert_eq!(gemini_only[0].id, "gemini_b");

        let favorites = store
            .list_conversations(
                &ConversationFilter {
                    favorite_only: true,
                    ..Default::default()
                },
                ConversationOrder::FavoriteDesc,
                Page::all(),
            )
            .unwrap();
        assert_eq!(favorites.len(), 1);

        let dated = store
            .list_conversations(
                &ConversationFilter {
                    date_range: Some(DateRange {
                        start: Some(1_500),
                        end: None,
                    }),
                    ..Default::default()
                },
                ConversationOrder::UpdatedDesc,
                Page::all(),
            )
            .unwrap();
        assert_eq!(dated.len(), 1);
        assert_eq!(dated[0].id, "gemini_b");
    }

    #[test]
    fn updated_index_follows_rewrites() {
        let (_dir, store) = open_store();
        let mut c = conversation(Platform::Claude, "a", 1_000);
        store.upsert_conversation(&c).unwrap();
        store
            .upsert_conversation(&conversation(Platform::Claude, "b", 2_000))
            .unwrap();

        c.updated_at = 5_000;
        store.upsert_conversation(&c).unwrap();

        let all = store
            .list_conversations(
                &ConversationFilter::default(),
                ConversationOrder::UpdatedDesc,
                Page::all(),
            )
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["claude_a", "claude_b"]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn count_matches_filters() {
        let (_dir, store) = open_store();
        store
            .upsert_conversation(&conversation(Platform::Claude, "a", 1_000))
            .unwrap();
        store
            .upsert_conversation(&conversation(Platform::Claude, "b", 2_000))
            .unwrap();
        store
            .upsert_conversation(&conversation(Platform::Gemini, "c", 3_000))
            .unwrap();

        assert_eq!(
            store
                .count_conversations(&ConversationFilter::default())
                .unwrap(),
            3
        );
        assert_eq!(
            store
                .count_conversations(&ConversationFilter {
                    platform: Some(Platform::Claude),
                    ..Default::default()
                })
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .count_conversations(&ConversationFilter {
                    favorite_only: true,
                    ..Default::default()
                })
                .unwrap(),
            0
        );
    }

    #[test]
    fn messages_sort_by_created_at() {
        let (_dir, store) = open_store();
        store
            .upsert_messages(&[
                message("claude_a", "m2", Role::Assistant, "second", 2_000),
                message("claude_a", "m1", Role::User, "first", 1_000),
                message("claude_b", "m9", Role::User, "other conversation", 500),
            ])
            .unwrap();

        let loaded = store.get_messages_by_conversation("claude_a").unwrap();
        let ids: Vec<&str> = loaded.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn existing_message_ids_and_by_ids() {
        let (_dir, store) = open_store();
        store
            .upsert_messages(&[message("claude_a", "m1", Role::User, "hello", 1_000)])
            .unwrap();

        let ids = vec!["m1".to_string(), "m2".to_string()];
        let existing = store.existing_message_ids("claude_a", &ids).unwrap();
        assert!(existing.contains("m1"));
        assert!(!existing.contains("m2"));

        let by_ids = store.get_messages_by_ids("claude_a", &ids).unwrap();
        assert_eq!(by_ids.len(), 1);
        assert_eq!(by_ids["m1"].content, "hello");
    }

    #[test]
    fn clear_platform_cascades_to_messages() {
        let (_dir, store) = open_store();
        let mut favorite = conversation(Platform::Claude, "a", 1_000);
        favorite.is_favorite = true;
        favorite.favorite_at = Some(1_000);
        store.upsert_conversation(&favorite).unwrap();
        store
            .upsert_conversation(&conversation(Platform::Gemini, "b", 2_000))
            .unwrap();
        store
            .upsert_messages(&[
                message("claude_a", "m1", Role::User, "hello", 1_000),
                message("gemini_b", "m2", Role::User, "hi", 1_000),
            ])
            .unwrap();

        let removed = store.clear_platform(Platform::Claude).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_conversation("claude_a").unwrap(), None);
        assert!(store.get_messages_by_conversation("claude_a").unwrap().is_empty());
        assert_eq!(store.get_messages_by_conversation("gemini_b").unwrap().len(), 1);

        // favorites index no longer serves the removed record
        let favorites = store
            .list_conversations(
                &ConversationFilter::default(),
                ConversationOrder::FavoriteDesc,
                Page::all(),
            )
            .unwrap();
        assert!(favorites.is_empty());
    }

    #[test]
    fn clear_all_empties_every_table() {
        let (_dir, store) = open_store();
        store
            .upsert_conversation(&conversation(Platform::Claude, "a", 1_000))
            .unwrap();
        store
            .upsert_messages(&[message("claude_a", "m1", Role::User, "hello", 1_000)])
            .unwrap();

        store.clear_all().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_conversations, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(store.get_conversation("claude_a").unwrap(), None);
    }

    #[test]
    fn kv_round_trip() {
        let (_dir, store) = open_store();
        assert_eq!(
            store.kv_get::<String>(KV_CLAUDE_ORG_ID).unwrap(),
            None
        );
        store
            .kv_put(KV_CLAUDE_ORG_ID, &"org-123".to_string())
            .unwrap();
        assert_eq!(
            store.kv_get::<String>(KV_CLAUDE_ORG_ID).unwrap().as_deref(),
            Some("org-123")
        );
        store.kv_put(KV_WIDGET_ENABLED, &true).unwrap();
        assert_eq!(store.kv_get::<bool>(KV_WIDGET_ENABLED).unwrap(), Some(true));
        store.kv_delete(KV_CLAUDE_ORG_ID).unwrap();
        assert_eq!(store.kv_get::<String>(KV_CLAUDE_ORG_ID).unwrap(), None);
    }

    #[test]
    fn stats_reports_bounds_and_platform_counts() {
        let (_dir, store) = open_store();
        store
            .upsert_conversation(&conversation(Platform::Claude, "a", 1_000))
            .unwrap();
        store
            .upsert_conversation(&conversation(Platform::Gemini, "b", 9_000))
            .unwrap();
        store
            .upsert_messages(&[message("claude_a", "m1", Role::User, "hello", 1_000)])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.by_platform["claude"], 1);
        assert_eq!(stats.by_platform["chatgpt"], 0);
        assert_eq!(stats.oldest, Some(1_000));
        assert_eq!(stats.newest, Some(9_000));
    }

    #[test]
    fn gemini_legacy_rows_are_repaired_on_load() {
        let (_dir, store) = open_store();
        // rows stored under the legacy c_-prefixed id
        store
            .upsert_messages(&[
                message("gemini_c_x1", "m1", Role::User, "hello", 1_000),
                message("gemini_c_x1", "m2", Role::Assistant, "hi", 2_000),
            ])
            .unwrap();

        let repaired = store.get_messages_by_conversation("gemini_x1").unwrap();
        assert_eq!(repaired.len(), 2);
        assert!(repaired.iter().all(|m| m.conversation_id == "gemini_x1"));

        // old rows are gone, new rows persist
        assert!(store.read_messages("gemini_c_x1").unwrap().is_empty());
        assert_eq!(store.read_messages("gemini_x1").unwrap().len(), 2);

        // the reverse direction also resolves
        store
            .upsert_messages(&[message("gemini_y1", "m3", Role::User, "hey", 1_000)])
            .unwrap();
        let reverse = store.get_messages_by_conversation("gemini_c_y1").unwrap();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].conversation_id, "gemini_c_y1");
    }

    #[test]
    fn non_gemini_ids_have_no_legacy_twin() {
        assert_eq!(gemini_legacy_twin("claude_abc"), None);
        assert_eq!(gemini_legacy_twin("gemini_c_x").as_deref(), Some("gemini_x"));
        assert_eq!(gemini_legacy_twin("gemini_x").as_deref(), Some("gemini_c_x"));
    }

    #[test]
    fn all_tags_unions_sorted_and_invalidates_on_write() {
        let (_dir, store) = open_store();
        let mut a = conversation(Platform::Claude, "a", 1_000);
        a.tags = vec!["rust".to_string(), "async".to_string()];
        store.upsert_conversation(&a).unwrap();
        assert_eq!(store.all_tags().unwrap(), ["async", "rust"]);

        let mut b = conversation(Platform::Gemini, "b", 2_000);
        b.tags = vec!["search".to_string(), "rust".to_string()];
        store.upsert_conversation(&b).unwrap();
        assert_eq!(store.all_tags().unwrap(), ["async", "rust", "search"]);

        store.clear_all().unwrap();
        assert!(store.all_tags().unwrap().is_empty());
    }
}
