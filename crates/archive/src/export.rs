//! Serialize a conversation selection into a portable ZIP archive.
//!
//! Layout:
//! ```text
//! manifest.json
//! conversations/<id>.json   (or <id>.md for the markdown scope)
//! ```

use std::io::{Cursor, Write};

use chrono::{TimeZone, Utc};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use chatcentral_store::{
    Conversation, ConversationFilter, ConversationOrder, Page, Platform, Role, Store,
    KV_LAST_EXPORT_STATS,
};

use crate::error::{ArchiveError, ArchiveResult};
use crate::manifest::{ArchivedConversation, ExportScope, ExportStats, Manifest, ARCHIVE_VERSION};

/// A finished export: the ZIP bytes plus the manifest that went into them and
/// the suggested download filename.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub bytes: Vec<u8>,
    pub manifest: Manifest,
    pub filename: String,
}

/// `chat-central-export-<platform|all>-<YYYYMMDD-HHMMSS>.zip`
pub fn export_filename(platform: Option<Platform>, exported_at: i64) -> String {
    let scope = platform.map(Platform::slug).unwrap_or("all");
    let stamp = Utc
        .timestamp_millis_opt(exported_at)
        .single()
        .map(|dt| dt.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|| "00000000-000000".to_string());
    format!("chat-central-export-{scope}-{stamp}.zip")
}

/// Gather the archive entries for a selection: explicit ids when given,
/// otherwise every conversation of `platform` (or the whole store).
pub fn collect_selection(
    store: &Store,
    platform: Option<Platform>,
    ids: Option<&[String]>,
) -> ArchiveResult<Vec<ArchivedConversation>> {
    let conversations: Vec<Conversation> = match ids {
        Some(ids) => {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                match store.get_conversation(id)? {
                    Some(conversation) => out.push(conversation),
                    None => {
                        tracing::warn!(id = %id, "export selection references a missing conversation");
                    }
                }
            }
            out
        }
        None => store.list_conversations(
            &ConversationFilter {
                platform,
                ..Default::default()
            },
            ConversationOrder::UpdatedDesc,
            Page::all(),
        )?,
    };

    let mut entries = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let messages = store.get_messages_by_conversation(&conversation.id)?;
        entries.push(ArchivedConversation {
            conversation,
            messages,
        });
    }
    Ok(entries)
}

/// Render one conversation as markdown: the title heading, then alternating
/// `## You` / `## Assistant` bodies separated by horizontal rules.
pub fn render_markdown(entry: &ArchivedConversation) -> String {
    let mut out = String::new();
    out.push_str("# ");
    if entry.conversation.title.is_empty() {
        out.push_str(&entry.conversation.id);
    } else {
        out.push_str(&entry.conversation.title);
    }
    out.push('\n');

    for message in &entry.messages {
        out.push_str("\n---\n\n");
        match message.role {
            Role::User => out.push_str("## You\n\n"),
            Role::Assistant => out.push_str("## Assistant\n\n"),
        }
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}

/// Build the ZIP archive for a prepared selection.
pub fn build_archive(
    entries: &[ArchivedConversation],
    scope: ExportScope,
    platform: Option<Platform>,
    exported_at: i64,
) -> ArchiveResult<ExportBundle> {
    let mut payloads: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
    let mut stats = ExportStats::default();
    for entry in entries {
        let (name, bytes) = match scope {
            ExportScope::Markdown => (
                format!("conversations/{}.md", entry.conversation.id),
                render_markdown(entry).into_bytes(),
            ),
            ExportScope::Full | ExportScope::Selected => (
                format!("conversations/{}.json", entry.conversation.id),
                serde_json::to_vec_pretty(entry)?,
            ),
        };
        stats.conversations += 1;
        stats.messages += entry.messages.len() as u64;
        stats.size_bytes += bytes.len() as u64;
        payloads.push((name, bytes));
    }

    let manifest = Manifest {
        version: ARCHIVE_VERSION,
        exported_at,
        stats,
        scope,
    };

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.start_file("manifest.json", options)?;
    writer.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    for (name, bytes) in &payloads {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }
    let bytes = writer.finish()?.into_inner();

    Ok(ExportBundle {
        bytes,
        filename: export_filename(platform, exported_at),
        manifest,
    })
}

/// Export straight out of the store and record the result under the
/// `last_export_stats` KV key.
pub fn export_store(
    store: &Store,
    platform: Option<Platform>,
    ids: Option<&[String]>,
    scope: ExportScope,
    now: i64,
) -> ArchiveResult<ExportBundle> {
    if matches!(scope, ExportScope::Selected) && ids.is_none() && platform.is_none() {
        return Err(ArchiveError::Validation(
            "selected scope requires a platform or explicit ids".to_string(),
        ));
    }

    let entries = collect_selection(store, platform, ids)?;
    let bundle = build_archive(&entries, scope, platform, now)?;
    store.kv_put(KV_LAST_EXPORT_STATS, &bundle.manifest.stats)?;
    info!(
        conversations = bundle.manifest.stats.conversations,
        messages = bundle.manifest.stats.messages,
        filename = %bundle.filename,
        "export archive built"
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcentral_store::Message;

    fn entry(id_suffix: &str, message_contents: &[(&str, Role)]) -> ArchivedConversation {
        let mut conversation = Conversation::new(Platform::Claude, id_suffix, 1_000);
        conversation.title = format!("Conversation {id_suffix}");
        let messages = message_contents
            .iter()
            .enumerate()
            .map(|(i, (content, role))| Message {
                id: format!("m{i}"),
                conversation_id: conversation.id.clone(),
                role: *role,
                content: content.to_string(),
                created_at: 1_000 + i as i64,
            })
            .collect();
        ArchivedConversation {
            conversation,
            messages,
        }
    }

    #[test]
    fn filename_pattern() {
        // 2024-01-02 03:04:05 UTC
        let at = 1_704_164_645_000;
        assert_eq!(
            export_filename(Some(Platform::Gemini), at),
            "chat-central-export-gemini-20240102-030405.zip"
        );
        assert!(export_filename(None, at).starts_with("chat-central-export-all-"));
    }

    #[test]
    fn manifest_counts_match_selection() {
        let entries = vec![
            entry("a", &[("hello", Role::User), ("hi", Role::Assistant)]),
            entry("b", &[("only one", Role::User)]),
        ];
        let bundle = build_archive(&entries, ExportScope::Full, None, 1_000).unwrap();
        assert_eq!(bundle.manifest.version, ARCHIVE_VERSION);
        assert_eq!(bundle.manifest.stats.conversations, 2);
        assert_eq!(bundle.manifest.stats.messages, 3);
        assert!(bundle.manifest.stats.size_bytes > 0);
        assert!(!bundle.bytes.is_empty());
    }

    #[test]
    fn markdown_rendering_alternates_roles() {
        let entry = entry("a", &[("question?", Role::User), ("answer.", Role::Assistant)]);
        let markdown = render_markdown(&entry);
        assert!(markdown.starts_with("# Conversation a\n"));
        let you = markdown.find("## You").unwrap();
        let assistant = markdown.find("## Assistant").unwrap();
        assert!(you < assistant);
        assert_eq!(markdown.matches("---").count(), 2);
        assert!(markdown.contains("question?"));
        assert!(markdown.contains("answer."));
    }

    #[test]
    fn export_store_records_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        let mut conversation = Conversation::new(Platform::Claude, "a", 1_000);
        conversation.title = "Exported".to_string();
        store.upsert_conversation(&conversation).unwrap();

        let bundle = export_store(&store, None, None, ExportScope::Full, 2_000).unwrap();
        assert_eq!(bundle.manifest.stats.conversations, 1);

        let recorded: Option<ExportStats> = store.kv_get(KV_LAST_EXPORT_STATS).unwrap();
        assert_eq!(recorded.unwrap(), bundle.manifest.stats);
    }

    #[test]
    fn selected_scope_requires_a_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        let err = export_store(&store, None, None, ExportScope::Selected, 0);
        assert!(matches!(err, Err(ArchiveError::Validation(_))));
    }
}
