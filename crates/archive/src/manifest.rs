use serde::{Deserialize, Serialize};

use chatcentral_store::{Conversation, Message};

pub const ARCHIVE_VERSION: u32 = 1;

/// `manifest.json` at the archive root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub exported_at: i64,
    pub stats: ExportStats,
    pub scope: ExportScope,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStats {
    pub conversations: u64,
    pub messages: u64,
    /// Summed byte length of the per-conversation payloads.
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportScope {
    Full,
    Selected,
    Markdown,
}

/// One `conversations/<id>.json` entry: the record with its messages inlined,
/// sorted by `createdAt` ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedConversation {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
}
