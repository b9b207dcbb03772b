use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The closed set of chat-service origins this system observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Claude,
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Gemini,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Claude, Platform::ChatGpt, Platform::Gemini];

    pub fn slug(self) -> &'static str {
        match self {
            Platform::Claude => "claude",
            Platform::ChatGpt => "chatgpt",
            Platform::Gemini => "gemini",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "claude" => Some(Platform::Claude),
            "chatgpt" => Some(Platform::ChatGpt),
            "gemini" => Some(Platform::Gemini),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Claude => "Claude",
            Platform::ChatGpt => "ChatGPT",
            Platform::Gemini => "Gemini",
        }
    }

    /// Opaque color tag used by presentation layers.
    pub fn color(self) -> &'static str {
        match self {
            Platform::Claude => "#d97757",
            Platform::ChatGpt => "#10a37f",
            Platform::Gemini => "#4285f4",
        }
    }

    /// URL prefixes the capture router uses to attribute observed traffic.
    pub fn base_urls(self) -> &'static [&'static str] {
        match self {
            Platform::Claude => &["https://claude.ai/"],
            Platform::ChatGpt => &["https://chatgpt.com/", "https://chat.openai.com/"],
            Platform::Gemini => &["https://gemini.google.com/"],
        }
    }

    /// Attribute a raw URL to a platform by prefix.
    pub fn from_url(url: &str) -> Option<Self> {
        Platform::ALL
            .into_iter()
            .find(|p| p.base_urls().iter().any(|prefix| url.starts_with(prefix)))
    }

    /// Deep link the batch orchestrator hands to a fetcher context to replay
    /// the detail request for one conversation. Claude's API is scoped per
    /// organization, so its link needs the stored org hint.
    pub fn detail_url(self, original_id: &str, claude_org: Option<&str>) -> Option<String> {
        match self {
            Platform::Claude => claude_org.map(|org| {
                format!("https://claude.ai/api/organizations/{org}/chat_conversations/{original_id}")
            }),
            Platform::ChatGpt => Some(format!(
                "https://chatgpt.com/backend-api/conversation/{original_id}"
            )),
            Platform::Gemini => Some(format!("https://gemini.google.com/app/{original_id}")),
        }
    }
}

/// How much of a conversation's body has been captured.
/// Ordered as a lattice: `None < Partial < Full`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DetailStatus {
    #[default]
    None,
    Partial,
    Full,
}

impl DetailStatus {
    pub fn rank(self) -> u8 {
        match self {
            DetailStatus::None => 0,
            DetailStatus::Partial => 1,
            DetailStatus::Full => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// UI theme preference persisted under the `config.theme` KV key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// Canonical identity: `<platform>_<originalId>`.
pub fn compose_id(platform: Platform, original_id: &str) -> String {
    format!("{}_{}", platform.slug(), original_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub platform: Platform,
    pub original_id: String,
    #[serde(default)]
    pub title: String,
    /// First ~200 chars of leading content.
    #[serde(default)]
    pub preview: String,
    /// External deep link. Write-once under merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: i64,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_at: Option<i64>,
    #[serde(default)]
    pub detail_status: DetailStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_synced_at: Option<i64>,
}

impl Conversation {
    /// A fresh record as produced by the listing capture path.
    pub fn new(platform: Platform, original_id: impl Into<String>, now: i64) -> Self {
        let original_id = original_id.into();
        Self {
            id: compose_id(platform, &original_id),
            platform,
            original_id,
            title: String::new(),
            preview: String::new(),
            url: None,
            created_at: now,
            updated_at: now,
            synced_at: now,
            message_count: 0,
            summary: None,
            tags: Vec::new(),
            is_favorite: false,
            favorite_at: None,
            detail_status: DetailStatus::None,
            detail_synced_at: None,
        }
    }

    /// Minimal record created when a user favorites a conversation before
    /// any of its body has been ingested.
    pub fn placeholder(platform: Platform, original_id: impl Into<String>, now: i64) -> Self {
        let mut conversation = Self::new(platform, original_id, now);
        conversation.is_favorite = true;
        conversation.favorite_at = Some(now);
        conversation
    }

    /// Check the record invariants enforced on insert and on archive import.
    pub fn validate(&self) -> StoreResult<()> {
        if self.original_id.is_empty() {
            return Err(StoreError::Validation(format!(
                "conversation {} has an empty originalId",
                self.id
            )));
        }
        let expected = compose_id(self.platform, &self.original_id);
        if self.id != expected {
            return Err(StoreError::Validation(format!(
                "conversation id {:?} does not match {:?}",
                self.id, expected
            )));
        }
        if self.created_at > self.updated_at {
            return Err(StoreError::Validation(format!(
                "conversation {}: createdAt {} is after updatedAt {}",
                self.id, self.created_at, self.updated_at
            )));
        }
        if self.is_favorite != self.favorite_at.is_some() {
            return Err(StoreError::Validation(format!(
                "conversation {}: favoriteAt must be set iff isFavorite",
                self.id
            )));
        }
        if self.detail_status != DetailStatus::None && self.detail_synced_at.is_none() {
            return Err(StoreError::Validation(format!(
                "conversation {}: detailSyncedAt missing for status {:?}",
                self.id, self.detail_status
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for tag in &self.tags {
            if tag.trim().is_empty() {
                return Err(StoreError::Validation(format!(
                    "conversation {}: empty tag",
                    self.id
                )));
            }
            if !seen.insert(tag.as_str()) {
                return Err(StoreError::Validation(format!(
                    "conversation {}: duplicate tag {tag:?}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// Inclusive bounds on `updatedAt`, in ms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn contains(&self, ts: i64) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts <= e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFilter {
    pub platform: Option<Platform>,
    #[serde(default)]
    pub favorite_only: bool,
    pub date_range: Option<DateRange>,
}

impl ConversationFilter {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if let Some(platform) = self.platform {
            if conversation.platform != platform {
                return false;
            }
        }
        if self.favorite_only && !conversation.is_favorite {
            return false;
        }
        if let Some(range) = &self.date_range {
            if !range.contains(conversation.updated_at) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationOrder {
    /// `updatedAt` descending. The default listing order.
    #[default]
    UpdatedDesc,
    /// `favoriteAt` descending; restricted to favorites by construction.
    FavoriteDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// The whole result set, unpaged.
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_serde_uses_lowercase_slugs() {
        assert_eq!(serde_json::to_string(&Platform::ChatGpt).unwrap(), "\"chatgpt\"");
        let back: Platform = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(back, Platform::Gemini);
    }

    #[test]
    fn platform_from_url_prefixes() {
        assert_eq!(
            Platform::from_url("https://chat.openai.com/c/abc"),
            Some(Platform::ChatGpt)
        );
        assert_eq!(
            Platform::from_url("https://claude.ai/api/organizations/x/chat_conversations"),
            Some(Platform::Claude)
        );
        assert_eq!(Platform::from_url("https://example.com/"), None);
    }

    #[test]
    fn detail_status_is_a_lattice() {
        assert!(DetailStatus::None < DetailStatus::Partial);
        assert!(DetailStatus::Partial < DetailStatus::Full);
        assert_eq!(DetailStatus::Full.rank(), 2);
    }

    #[test]
    fn claude_detail_url_requires_org_hint() {
        assert!(Platform::Claude.detail_url("abc", None).is_none());
        assert_eq!(
            Platform::Claude.detail_url("abc", Some("org-1")).unwrap(),
            "https://claude.ai/api/organizations/org-1/chat_conversations/abc"
        );
        assert!(Platform::Gemini.detail_url("abc", None).is_some());
    }

    #[test]
    fn validate_rejects_mismatched_id() {
        let mut conversation = Conversation::new(Platform::Claude, "abc", 1_000);
        conversation.id = "chatgpt_abc".to_string();
        assert!(conversation.validate().is_err());
    }

    #[test]
    fn validate_ties_favorite_at_to_flag() {
        let mut conversation = Conversation::new(Platform::Claude, "abc", 1_000);
        conversation.is_favorite = true;
        assert!(conversation.validate().is_err());
        conversation.favorite_at = Some(1_000);
        assert!(conversation.validate().is_ok());
    }

    #[test]
    fn placeholder_is_a_valid_favorite() {
        let placeholder = Conversation::placeholder(Platform::Gemini, "xyz", 42);
        placeholder.validate().unwrap();
        assert_eq!(placeholder.id, "gemini_xyz");
        assert!(placeholder.is_favorite);
        assert_eq!(placeholder.favorite_at, Some(42));
    }
}
