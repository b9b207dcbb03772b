pub mod error;
pub mod merge;
pub mod schema;
pub mod store;
pub mod tags;

pub use error::{StoreError, StoreResult};
pub use merge::{
    apply_detail_update, apply_listing, merge_conversations, split_conversation_id,
    toggle_favorite, DetailMode, DetailOutcome,
};
pub use schema::{
    compose_id, Conversation, ConversationFilter, ConversationOrder, DateRange, DetailStatus,
    Message, Page, Platform, Role, Theme,
};
pub use store::{
    CacheStats, Store, StoreStats, KV_CLAUDE_ORG_ID, KV_LAST_EXPORT_STATS, KV_THEME,
    KV_WIDGET_ENABLED,
};
