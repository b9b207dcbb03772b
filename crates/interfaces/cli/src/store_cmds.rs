//! Commands that open the embedded store directly. The store is
//! single-writer, so these require the daemon to be stopped; a held lock
//! surfaces as a `Store` error.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;

use chatcentral_archive::{export_store, import_archive, ExportScope, ImportStrategy};
use chatcentral_config::AppConfig;
use chatcentral_store::{Platform, Store, Theme, KV_THEME, KV_WIDGET_ENABLED};

use crate::ConfigCommands;

fn open_store(config: &AppConfig) -> Result<Store> {
    Store::open(config.store_path()).context(
        "cannot open the store; if the daemon is running, stop it first (`chat-central daemon stop`)",
    )
}

pub(crate) fn export(
    config: &AppConfig,
    platform: Option<Platform>,
    markdown: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let store = open_store(config)?;
    let scope = if markdown {
        ExportScope::Markdown
    } else {
        ExportScope::Full
    };
    let bundle = export_store(
        &store,
        platform,
        None,
        scope,
        Utc::now().timestamp_millis(),
    )?;
    let path = out.unwrap_or_else(|| PathBuf::from(&bundle.filename));
    std::fs::write(&path, &bundle.bytes)?;
    println!(
        "exported {} conversations ({} messages) to {}",
        bundle.manifest.stats.conversations,
        bundle.manifest.stats.messages,
        path.display()
    );
    Ok(())
}

pub(crate) fn import(config: &AppConfig, path: &Path, strategy: ImportStrategy) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read archive {}", path.display()))?;
    let store = open_store(config)?;
    let size_warn_bytes = config.export.size_warn_mb * 1024 * 1024;
    let report = import_archive(
        &store,
        &bytes,
        strategy,
        size_warn_bytes,
        Utc::now().timestamp_millis(),
    )?;

    println!(
        "imported: {} conversations, {} messages",
        report.imported.conversations, report.imported.messages
    );
    println!(
        "skipped:  {} conversations, {} messages",
        report.skipped.conversations, report.skipped.messages
    );
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    if !report.conflicts.is_empty() {
        println!("conflicts: {}", report.conflicts.len());
    }
    Ok(())
}

pub(crate) fn clear(config: &AppConfig, platform: Option<Platform>, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to delete without --yes");
    }
    let store = open_store(config)?;
    match platform {
        Some(platform) => {
            let removed = store.clear_platform(platform)?;
            println!("cleared {removed} {} conversations", platform.slug());
        }
        None => {
            store.clear_all()?;
            println!("cleared all captured data");
        }
    }
    Ok(())
}

pub(crate) fn config_cmd(config: &AppConfig, command: ConfigCommands) -> Result<()> {
    let store = open_store(config)?;
    match command {
        ConfigCommands::Theme { value: None } => {
            let theme: Theme = store.kv_get(KV_THEME)?.unwrap_or_default();
            println!("{}", serde_json::to_string(&theme)?.trim_matches('"'));
        }
        ConfigCommands::Theme { value: Some(raw) } => {
            let theme: Theme = serde_json::from_value(serde_json::Value::String(raw.clone()))
                .map_err(|_| anyhow::anyhow!("unknown theme {raw:?} (light, dark, system)"))?;
            store.kv_put(KV_THEME, &theme)?;
            println!("theme set to {raw}");
        }
        ConfigCommands::Widget { value: None } => {
            let enabled: bool = store.kv_get(KV_WIDGET_ENABLED)?.unwrap_or(false);
            println!("{enabled}");
        }
        ConfigCommands::Widget { value: Some(enabled) } => {
            store.kv_put(KV_WIDGET_ENABLED, &enabled)?;
            println!("widget enabled = {enabled}");
        }
    }
    Ok(())
}
