//! Parse, validate, and idempotently apply an exported archive.

use std::io::{Cursor, Read};

use tracing::{info, warn};
use zip::ZipArchive;

use chatcentral_store::{compose_id, merge_conversations, Store};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};
use crate::manifest::{ArchivedConversation, ExportScope, Manifest, ARCHIVE_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStrategy {
    /// Feed each conversation through the merge engine; keep existing
    /// messages on id conflict.
    Merge,
    /// Delete the target's messages, then apply the archive verbatim.
    Replace,
    /// Leave existing targets untouched.
    Skip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub conversations: u64,
    pub messages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConflict {
    pub conversation_id: String,
    pub resolution: ImportStrategy,
}

/// Truthful summary of a (possibly partial) import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: ImportCounts,
    pub skipped: ImportCounts,
    pub conflicts: Vec<ImportConflict>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// A parsed and structurally validated archive.
#[derive(Debug)]
pub struct ParsedArchive {
    pub manifest: Manifest,
    pub entries: Vec<ArchivedConversation>,
    /// Non-fatal findings (oversize advisory, unreadable entries).
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Read and validate archive bytes.
///
/// A bad manifest is fatal; a bad conversation file is recorded and the rest
/// of the archive is still usable. Exceeding `size_warn_bytes` only adds a
/// warning.
pub fn read_archive(bytes: &[u8], size_warn_bytes: u64) -> ArchiveResult<ParsedArchive> {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if bytes.len() as u64 > size_warn_bytes {
        warnings.push(format!(
            "archive is {} bytes, above the {} byte advisory threshold",
            bytes.len(),
            size_warn_bytes
        ));
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let manifest: Manifest = {
        let mut file = archive.by_name("manifest.json").map_err(|_| {
            ArchiveError::Validation("archive has no manifest.json".to_string())
        })?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)?;
        serde_json::from_str(&raw)
            .map_err(|err| ArchiveError::Validation(format!("manifest.json: {err}")))?
    };
    if manifest.version != ARCHIVE_VERSION {
        return Err(ArchiveError::Validation(format!(
            "unsupported archive version {} (expected {})",
            manifest.version, ARCHIVE_VERSION
        )));
    }
    if manifest.scope == ExportScope::Markdown {
        return Err(ArchiveError::Validation(
            "markdown archives are export-only and cannot be imported".to_string(),
        ));
    }

    let names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("conversations/") && name.ends_with(".json"))
        .map(String::from)
        .collect();

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let mut raw = String::new();
        {
            let mut file = archive.by_name(&name)?;
            if file.read_to_string(&mut raw).is_err() {
                errors.push(format!("{name}: unreadable entry"));
                continue;
            }
        }
        let entry: ArchivedConversation = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                errors.push(format!("{name}: {err}"));
                continue;
            }
        };
        let expected = compose_id(entry.conversation.platform, &entry.conversation.original_id);
        if entry.conversation.original_id.is_empty() || entry.conversation.id != expected {
            errors.push(format!(
                "{name}: id {:?} does not match platform/originalId",
                entry.conversation.id
            ));
            continue;
        }
        entries.push(entry);
    }

    Ok(ParsedArchive {
        manifest,
        entries,
        warnings,
        errors,
    })
}

/// Apply an archive under the given conflict-resolution strategy.
/// Per-conversation failures are recorded and the import continues.
pub fn import_archive(
    store: &Store,
    bytes: &[u8],
    strategy: ImportStrategy,
    size_warn_bytes: u64,
    now: i64,
) -> ArchiveResult<ImportReport> {
    let parsed = read_archive(bytes, size_warn_bytes)?;

    let mut report = ImportReport {
        warnings: parsed.warnings,
        errors: parsed.errors,
        ..Default::default()
    };

    for entry in parsed.entries {
        if let Err(err) = apply_entry(store, &entry, strategy, now, &mut report) {
            warn!(id = %entry.conversation.id, %err, "import entry failed");
            report
                .errors
                .push(format!("{}: {err}", entry.conversation.id));
        }
    }

    info!(
        strategy = ?strategy,
        imported = report.imported.conversations,
        skipped = report.skipped.conversations,
        errors = report.errors.len(),
        "archive import finished"
    );
    Ok(report)
}

fn apply_entry(
    store: &Store,
    entry: &ArchivedConversation,
    strategy: ImportStrategy,
    now: i64,
    report: &mut ImportReport,
) -> ArchiveResult<()> {
    let existing = store.get_conversation(&entry.conversation.id)?;

    // Archives produced elsewhere may carry stale conversation ids on the
    // inlined messages; re-anchor them to the entry.
    let mut messages = entry.messages.clone();
    for message in &mut messages {
        message.conversation_id = entry.conversation.id.clone();
    }

    match strategy {
        ImportStrategy::Skip => {
            if existing.is_some() {
                report.skipped.conversations += 1;
                report.skipped.messages += messages.len() as u64;
                report.conflicts.push(ImportConflict {
                    conversation_id: entry.conversation.id.clone(),
                    resolution: ImportStrategy::Skip,
                });
                return Ok(());
            }
            store.upsert_conversation(&entry.conversation)?;
            store.upsert_messages(&messages)?;
            report.imported.conversations += 1;
            report.imported.messages += messages.len() as u64;
        }
        ImportStrategy::Replace => {
            if existing.is_some() {
                report.conflicts.push(ImportConflict {
                    conversation_id: entry.conversation.id.clone(),
                    resolution: ImportStrategy::Replace,
                });
            }
            store.delete_messages_by_conversation(&entry.conversation.id)?;
            store.upsert_conversation(&entry.conversation)?;
            store.upsert_messages(&messages)?;
            report.imported.conversations += 1;
            report.imported.messages += messages.len() as u64;
        }
        ImportStrategy::Merge => match existing {
            None => {
                store.upsert_conversation(&entry.conversation)?;
                store.upsert_messages(&messages)?;
                report.imported.conversations += 1;
                report.imported.messages += messages.len() as u64;
            }
            Some(existing) => {
                let merged = merge_conversations(&existing, &entry.conversation, now);
                if merged != existing {
                    store.upsert_conversation(&merged)?;
                }
                report.skipped.conversations += 1;
                report.conflicts.push(ImportConflict {
                    conversation_id: entry.conversation.id.clone(),
                    resolution: ImportStrategy::Merge,
                });

                let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
                let present = store.existing_message_ids(&entry.conversation.id, &ids)?;
                let fresh: Vec<_> = messages
                    .iter()
                    .filter(|m| !present.contains(&m.id))
                    .cloned()
                    .collect();
                report.skipped.messages += (messages.len() - fresh.len()) as u64;
                if !fresh.is_empty() {
                    report.imported.messages += fresh.len() as u64;
                    store.upsert_messages(&fresh)?;
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{build_archive, export_store};
    use crate::manifest::ExportScope;
    use chatcentral_store::{Conversation, Message, Platform, Role};
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const WARN_BYTES: u64 = 50 * 1024 * 1024;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        (dir, store)
    }

    fn seed(store: &Store) {
        let mut a = Conversation::new(Platform::Claude, "a", 1_000);
        a.title = "First".to_string();
        a.tags = vec!["rust".to_string()];
        let mut b = Conversation::new(Platform::Gemini, "b", 2_000);
        b.title = "Second".to_string();
        store.upsert_conversations(&[a, b]).unwrap();
        store
            .upsert_messages(&[
                Message {
                    id: "m1".to_string(),
                    conversation_id: "claude_a".to_string(),
                    role: Role::User,
                    content: "hello".to_string(),
                    created_at: 1_000,
                },
                Message {
                    id: "m2".to_string(),
                    conversation_id: "claude_a".to_string(),
                    role: Role::Assistant,
                    content: "hi there".to_string(),
                    created_at: 1_500,
                },
                Message {
                    id: "m3".to_string(),
                    conversation_id: "gemini_b".to_string(),
                    role: Role::User,
                    content: "question".to_string(),
                    created_at: 2_000,
                },
            ])
            .unwrap();
    }

    #[test]
    fn export_import_round_trip_with_replace() {
        let (_dir_a, source) = open_store();
        seed(&source);
        let bundle = export_store(&source, None, None, ExportScope::Full, 5_000).unwrap();

        let (_dir_b, target) = open_store();
        let report =
            import_archive(&target, &bundle.bytes, ImportStrategy::Replace, WARN_BYTES, 6_000)
                .unwrap();
        assert_eq!(report.imported.conversations, 2);
        assert_eq!(report.imported.messages, 3);
        assert!(report.errors.is_empty());

        for id in ["claude_a", "gemini_b"] {
            assert_eq!(
                source.get_conversation(id).unwrap(),
                target.get_conversation(id).unwrap()
            );
            assert_eq!(
                source.get_messages_by_conversation(id).unwrap(),
                target.get_messages_by_conversation(id).unwrap()
            );
        }
    }

    #[test]
    fn scenario_f_merge_import_is_idempotent() {
        let (_dir, store) = open_store();
        seed(&store);
        let bundle = export_store(&store, None, None, ExportScope::Full, 5_000).unwrap();

        let report =
            import_archive(&store, &bundle.bytes, ImportStrategy::Merge, WARN_BYTES, 6_000)
                .unwrap();
        assert_eq!(report.imported.conversations, 0);
        assert_eq!(report.imported.messages, 0);
        assert_eq!(report.skipped.conversations, 2);
        assert_eq!(report.skipped.messages, 3);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn skip_strategy_leaves_existing_untouched() {
        let (_dir, source) = open_store();
        seed(&source);
        let bundle = export_store(&source, None, None, ExportScope::Full, 5_000).unwrap();

        // mutate the existing record; skip must not clobber it
        let mut existing = source.get_conversation("claude_a").unwrap().unwrap();
        existing.title = "Locally renamed".to_string();
        source.upsert_conversation(&existing).unwrap();

        let report =
            import_archive(&source, &bundle.bytes, ImportStrategy::Skip, WARN_BYTES, 6_000)
                .unwrap();
        assert_eq!(report.imported.conversations, 0);
        assert_eq!(report.skipped.conversations, 2);
        assert_eq!(
            source
                .get_conversation("claude_a")
                .unwrap()
                .unwrap()
                .title,
            "Locally renamed"
        );
    }

    #[test]
    fn wrong_version_is_fatal() {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("manifest.json", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(br#"{"version":2,"exportedAt":0,"stats":{"conversations":0,"messages":0,"sizeBytes":0},"scope":"full"}"#)
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = read_archive(&bytes, WARN_BYTES);
        assert!(matches!(err, Err(ArchiveError::Validation(_))));
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("conversations/claude_a.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"{}").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(
            read_archive(&bytes, WARN_BYTES),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[test]
    fn bad_entries_are_recorded_and_the_rest_import() {
        let (_dir, source) = open_store();
        seed(&source);
        let good = export_store(&source, Some(Platform::Claude), None, ExportScope::Full, 5_000)
            .unwrap();

        // rebuild the archive with one corrupt and one mismatched entry added
        let parsed = read_archive(&good.bytes, WARN_BYTES).unwrap();
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("manifest.json", options).unwrap();
        writer
            .write_all(&serde_json::to_vec(&parsed.manifest).unwrap())
            .unwrap();
        for entry in &parsed.entries {
            writer
                .start_file(format!("conversations/{}.json", entry.conversation.id), options)
                .unwrap();
            writer.write_all(&serde_json::to_vec(entry).unwrap()).unwrap();
        }
        writer.start_file("conversations/broken.json", options).unwrap();
        writer.write_all(b"not json at all").unwrap();
        let mut mismatched = Conversation::new(Platform::Gemini, "z", 1_000);
        mismatched.id = "claude_z".to_string();
        writer
            .start_file("conversations/claude_z.json", options)
            .unwrap();
        writer
            .write_all(
                &serde_json::to_vec(&ArchivedConversation {
                    conversation: mismatched,
                    messages: Vec::new(),
                })
                .unwrap(),
            )
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let (_dir_b, target) = open_store();
        let report =
            import_archive(&target, &bytes, ImportStrategy::Replace, WARN_BYTES, 6_000).unwrap();
        assert_eq!(report.imported.conversations, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(target.get_conversation("claude_a").unwrap().is_some());
    }

    #[test]
    fn oversize_archive_warns_but_proceeds() {
        let (_dir, source) = open_store();
        seed(&source);
        let bundle = export_store(&source, None, None, ExportScope::Full, 5_000).unwrap();

        let (_dir_b, target) = open_store();
        let report = import_archive(&target, &bundle.bytes, ImportStrategy::Replace, 10, 6_000)
            .unwrap();
        assert!(!report.warnings.is_empty());
        assert_eq!(report.imported.conversations, 2);
    }

    #[test]
    fn markdown_archives_do_not_import() {
        let (_dir, source) = open_store();
        seed(&source);
        let entries =
            crate::export::collect_selection(&source, None, None).unwrap();
        let bundle = build_archive(&entries, ExportScope::Markdown, None, 5_000).unwrap();
        assert!(matches!(
            read_archive(&bundle.bytes, WARN_BYTES),
            Err(ArchiveError::Validation(_))
        ));
    }
}
