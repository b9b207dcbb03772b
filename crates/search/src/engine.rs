//! Ranked search over the conversation store.
//!
//! Runs over a snapshot: the candidate set is listed once, then each
//! candidate is scored synchronously against the case-folded residue terms.

use serde::{Deserialize, Serialize};
use tracing::debug;

use chatcentral_store::tags::has_all_tags;
use chatcentral_store::{
    Conversation, ConversationFilter, ConversationOrder, DateRange, Message, Page, Store,
    StoreResult,
};

use crate::query::SearchQuery;

const WEIGHT_TITLE: f32 = 4.0;
const WEIGHT_SUMMARY: f32 = 2.0;
const WEIGHT_PREVIEW: f32 = 1.0;
const WEIGHT_MESSAGE: f32 = 1.5;
/// Per-term saturation on message-body occurrences.
const MESSAGE_MATCH_CAP: usize = 3;

/// Message snippets are windows of at most this many chars centered on the
/// first match.
const SNIPPET_CHARS: usize = 120;
const MAX_SNIPPETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetKind {
    Title,
    Summary,
    Preview,
    Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnippet {
    #[serde(rename = "type")]
    pub kind: SnippetKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub conversation: Conversation,
    pub score: f32,
    pub matches: Vec<MatchSnippet>,
}

/// Execute a parsed query. `with_snippets` selects between the two dispatch
/// variants; both share this scoring kernel.
pub fn run_search(
    store: &Store,
    query: &SearchQuery,
    limit: Option<usize>,
    with_snippets: bool,
) -> StoreResult<Vec<SearchHit>> {
    let filter = ConversationFilter {
        platform: query.platform,
        favorite_only: query.favorite_only,
        date_range: if query.after.is_some() || query.before.is_some() {
            Some(DateRange {
                start: query.after,
                end: query.before,
            })
        } else {
            None
        },
    };

    let candidates =
        store.list_conversations(&filter, ConversationOrder::UpdatedDesc, Page::all())?;
    debug!(
        candidates = candidates.len(),
        terms = query.terms.len(),
        "search scan"
    );

    let mut hits: Vec<SearchHit> = Vec::new();
    for conversation in candidates {
        if !has_all_tags(&conversation, &query.tags) {
            continue;
        }

        if query.terms.is_empty() {
            hits.push(SearchHit {
                conversation,
                score: 0.0,
                matches: Vec::new(),
            });
            continue;
        }

        let messages = store.get_messages_by_conversation(&conversation.id)?;
        let Some(scored) = score_conversation(&conversation, &messages, &query.terms) else {
            continue;
        };
        let matches = if with_snippets {
            assemble_snippets(&conversation, &messages, &scored, &query.terms)
        } else {
            Vec::new()
        };
        hits.push(SearchHit {
            conversation,
            score: scored.score,
            matches,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.conversation.updated_at.cmp(&a.conversation.updated_at))
    });
    if let Some(limit) = limit {
        hits.truncate(limit);
    }
    Ok(hits)
}

struct ScoredFields {
    score: f32,
    title: bool,
    summary: bool,
    preview: bool,
    /// Indices into the message slice that matched any term.
    matched_messages: Vec<usize>,
}

/// Returns `None` unless every term matches somewhere.
fn score_conversation(
    conversation: &Conversation,
    messages: &[Message],
    terms: &[String],
) -> Option<ScoredFields> {
    let title = conversation.title.to_lowercase();
    let summary = conversation.summary.as_deref().unwrap_or("").to_lowercase();
    let preview = conversation.preview.to_lowercase();
    let bodies: Vec<String> = messages.iter().map(|m| m.content.to_lowercase()).collect();

    let mut out = ScoredFields {
        score: 0.0,
        title: false,
        summary: false,
        preview: false,
        matched_messages: Vec::new(),
    };

    for term in terms {
        let mut best = 0.0f32;
        if title.contains(term.as_str()) {
            out.title = true;
            best = best.max(WEIGHT_TITLE);
        }
        if !summary.is_empty() && summary.contains(term.as_str()) {
            out.summary = true;
            best = best.max(WEIGHT_SUMMARY);
        }
        if preview.contains(term.as_str()) {
            out.preview = true;
            best = best.max(WEIGHT_PREVIEW);
        }

        let mut occurrences = 0usize;
        for (idx, body) in bodies.iter().enumerate() {
            let found = body.matches(term.as_str()).count();
            if found > 0 {
                if !out.matched_messages.contains(&idx) {
                    out.matched_messages.push(idx);
                }
                occurrences += found;
            }
        }
        if occurrences > 0 {
            best = best.max(WEIGHT_MESSAGE * occurrences.min(MESSAGE_MATCH_CAP) as f32);
        }

        if best == 0.0 {
            return None;
        }
        out.score += best;
    }

    Some(out)
}

fn assemble_snippets(
    conversation: &Conversation,
    messages: &[Message],
    scored: &ScoredFields,
    terms: &[String],
) -> Vec<MatchSnippet> {
    let mut snippets = Vec::new();

    if scored.title {
        snippets.push(MatchSnippet {
            kind: SnippetKind::Title,
            text: conversation.title.clone(),
            message_id: None,
        });
    }
    if scored.summary && snippets.len() < MAX_SNIPPETS {
        if let Some(summary) = &conversation.summary {
            snippets.push(MatchSnippet {
                kind: SnippetKind::Summary,
                text: summary.clone(),
                message_id: None,
            });
        }
    }
    if scored.preview && snippets.len() < MAX_SNIPPETS {
        snippets.push(MatchSnippet {
            kind: SnippetKind::Preview,
            text: conversation.preview.clone(),
            message_id: None,
        });
    }

    for &idx in &scored.matched_messages {
        if snippets.len() >= MAX_SNIPPETS {
            break;
        }
        let message = &messages[idx];
        let text = snippet_window(&message.content, terms);
        snippets.push(MatchSnippet {
            kind: SnippetKind::Message,
            text,
            message_id: Some(message.id.clone()),
        });
    }

    snippets
}

/// Walk a byte offset down to the nearest char boundary.
fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// A window of at most `SNIPPET_CHARS` chars centered on the first match of
/// any term, with ellipses marking the cut points.
fn snippet_window(content: &str, terms: &[String]) -> String {
    let folded = content.to_lowercase();
    let anchor = terms
        .iter()
        .filter_map(|term| folded.find(term.as_str()))
        .min()
        .unwrap_or(0);
    // The fold can shift byte offsets for multi-byte case pairs; clamp onto a
    // boundary of the original text.
    let anchor = floor_boundary(content, anchor);

    let chars_before = content[..anchor].chars().count();
    let total_chars = content.chars().count();
    if total_chars <= SNIPPET_CHARS {
        return content.to_string();
    }

    let pad = SNIPPET_CHARS / 2;
    let start_char = chars_before.saturating_sub(pad);
    let end_char = (start_char + SNIPPET_CHARS).min(total_chars);
    let start_char = end_char.saturating_sub(SNIPPET_CHARS);

    let start_byte = content
        .char_indices()
        .nth(start_char)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let end_byte = content
        .char_indices()
        .nth(end_char)
        .map(|(idx, _)| idx)
        .unwrap_or(content.len());

    let mut out = String::new();
    if start_char > 0 {
        out.push('…');
    }
    out.push_str(&content[start_byte..end_byte]);
    if end_char < total_chars {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;
    use chatcentral_store::{Platform, Role};

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        (dir, store)
    }

    fn conversation(
        store: &Store,
        platform: Platform,
        original_id: &str,
        title: &str,
        preview: &str,
        updated_at: i64,
    ) -> Conversation {
        let mut c = Conversation::new(platform, original_id, 100);
        c.title = title.to_string();
        c.preview = preview.to_string();
        c.updated_at = updated_at;
        store.upsert_conversation(&c).unwrap();
        c
    }

    fn message(store: &Store, conversation_id: &str, id: &str, content: &str, at: i64) {
        store
            .upsert_messages(&[Message {
                id: id.to_string(),
                conversation_id: conversation_id.to_string(),
                role: Role::User,
                content: content.to_string(),
                created_at: at,
            }])
            .unwrap();
    }

    #[test]
    fn scenario_d_ranking() {
        let (_dir, store) = open_store();
        conversation(&store, Platform::Claude, "c1", "React hooks guide", "…", 1_000);
        conversation(
            &store,
            Platform::Claude,
            "c2",
            "Vue basics",
            "also mentions react",
            2_000,
        );
        conversation(&store, Platform::Claude, "c3", "CSS tricks", "", 3_000);
        message(&store, "claude_c1", "m1", "one react mention", 500);
        message(&store, "claude_c3", "m2", "react react react", 700);

        let hits = run_search(&store, &parse_query("react"), None, true).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.conversation.id.as_str()).collect();
        assert_eq!(ids, ["claude_c3", "claude_c1", "claude_c2"]);
        assert!(hits[0].score > hits[1].score);
        assert!(hits[1].score > hits[2].score);

        // C3 matched in a message body; its snippet carries the message id
        assert_eq!(hits[0].matches[0].kind, SnippetKind::Message);
        assert_eq!(hits[0].matches[0].message_id.as_deref(), Some("m2"));
        // C1 leads with its title snippet
        assert_eq!(hits[1].matches[0].kind, SnippetKind::Title);
    }

    #[test]
    fn all_terms_must_match() {
        let (_dir, store) = open_store();
        conversation(
            &store,
            Platform::Claude,
            "c1",
            "React hooks guide",
            "state management",
            1_000,
        );

        assert_eq!(
            run_search(&store, &parse_query("react state"), None, false)
                .unwrap()
                .len(),
            1
        );
        assert!(run_search(&store, &parse_query("react missingword"), None, false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn operator_filters_restrict_candidates() {
        let (_dir, store) = open_store();
        conversation(&store, Platform::Claude, "c1", "rust talk", "", 1_000);
        conversation(&store, Platform::Gemini, "g1", "rust talk", "", 2_000);
        let mut favorite = Conversation::new(Platform::Gemini, "g2", 100);
        favorite.title = "rust talk".to_string();
        favorite.updated_at = 3_000;
        favorite.is_favorite = true;
        favorite.favorite_at = Some(3_000);
        store.upsert_conversation(&favorite).unwrap();

        let hits = run_search(&store, &parse_query("platform:gemini rust"), None, false).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.conversation.platform == Platform::Gemini));

        let hits = run_search(&store, &parse_query("is:favorite rust"), None, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].conversation.id, "gemini_g2");
    }

    #[test]
    fn tag_filter_uses_and_semantics() {
        let (_dir, store) = open_store();
        let mut c = Conversation::new(Platform::Claude, "c1", 100);
        c.title = "tagged".to_string();
        c.tags = vec!["rust".to_string(), "db".to_string()];
        store.upsert_conversation(&c).unwrap();

        assert_eq!(
            run_search(&store, &parse_query("tag:rust tag:db"), None, false)
                .unwrap()
                .len(),
            1
        );
        assert!(run_search(&store, &parse_query("tag:rust tag:other"), None, false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_residue_returns_operator_filtered_set_by_recency() {
        let (_dir, store) = open_store();
        conversation(&store, Platform::Claude, "c1", "one", "", 1_000);
        conversation(&store, Platform::Claude, "c2", "two", "", 2_000);

        let hits = run_search(&store, &parse_query("platform:claude"), None, false).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.conversation.id.as_str()).collect();
        assert_eq!(ids, ["claude_c2", "claude_c1"]);
    }

    #[test]
    fn ties_break_by_recency() {
        let (_dir, store) = open_store();
        conversation(&store, Platform::Claude, "old", "rust guide", "", 1_000);
        conversation(&store, Platform::Claude, "new", "rust guide", "", 2_000);

        let hits = run_search(&store, &parse_query("rust"), None, false).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.conversation.id.as_str()).collect();
        assert_eq!(ids, ["claude_new", "claude_old"]);
    }

    #[test]
    fn limit_truncates_after_ranking() {
        let (_dir, store) = open_store();
        conversation(&store, Platform::Claude, "c1", "rust one", "", 1_000);
        conversation(&store, Platform::Claude, "c2", "rust two", "", 2_000);
        let hits = run_search(&store, &parse_query("rust"), Some(1), false).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn message_snippets_are_bounded_windows_with_ellipses() {
        let (_dir, store) = open_store();
        conversation(&store, Platform::Claude, "c1", "padding", "", 1_000);
        let long = format!("{} needle {}", "x".repeat(300), "y".repeat(300));
        message(&store, "claude_c1", "m1", &long, 500);

        let hits = run_search(&store, &parse_query("needle"), None, true).unwrap();
        assert_eq!(hits.len(), 1);
        let snippet = hits[0]
            .matches
            .iter()
            .find(|m| m.kind == SnippetKind::Message)
            .unwrap();
        assert!(snippet.text.starts_with('…'));
        assert!(snippet.text.ends_with('…'));
        assert!(snippet.text.contains("needle"));
        assert!(snippet.text.chars().count() <= SNIPPET_CHARS + 2);
    }

    #[test]
    fn snippet_window_handles_multibyte_text() {
        let content = format!("{}ナレッジ needle {}", "あ".repeat(100), "い".repeat(100));
        let window = snippet_window(&content, &["needle".to_string()]);
        assert!(window.contains("needle"));
        assert!(window.chars().count() <= SNIPPET_CHARS + 2);
    }

    #[test]
    fn at_most_three_snippets() {
        let (_dir, store) = open_store();
        let mut c = Conversation::new(Platform::Claude, "c1", 100);
        c.title = "rust title".to_string();
        c.preview = "rust preview".to_string();
        c.summary = Some("rust summary".to_string());
        store.upsert_conversation(&c).unwrap();
        message(&store, "claude_c1", "m1", "rust body", 500);

        let hits = run_search(&store, &parse_query("rust"), None, true).unwrap();
        assert_eq!(hits[0].matches.len(), MAX_SNIPPETS);
        assert_eq!(hits[0].matches[0].kind, SnippetKind::Title);
    }
}
