use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the embedded store and daemon runtime files.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".chat-central".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/chat-central.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Batch-fetch tunables. The Gemini capture path is navigation-driven and
/// needs a longer poll window plus a slower dispatch cadence than the
/// dispatch-fetch platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// How often the orchestrator re-reads the store while waiting for a
    /// conversation body to land, in milliseconds.
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub fetch_interval_ms: u64,
    pub gemini_poll_timeout_secs: u64,
    pub gemini_fetch_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            poll_timeout_secs: 15,
            fetch_interval_ms: 800,
            gemini_poll_timeout_secs: 20,
            gemini_fetch_interval_ms: 3000,
        }
    }
}

impl BatchConfig {
    /// Poll timeout for a platform slug (`claude`, `chatgpt`, `gemini`).
    pub fn poll_timeout_secs_for(&self, platform_slug: &str) -> u64 {
        if platform_slug == "gemini" {
            self.gemini_poll_timeout_secs
        } else {
            self.poll_timeout_secs
        }
    }

    /// Inter-item sleep for a platform slug, in milliseconds.
    pub fn fetch_interval_ms_for(&self, platform_slug: &str) -> u64 {
        if platform_slug == "gemini" {
            self.gemini_fetch_interval_ms
        } else {
            self.fetch_interval_ms
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Advisory archive size threshold. Imports above it carry a warning
    /// in the report but are never refused on size alone.
    pub size_warn_mb: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { size_warn_mb: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub daemon: DaemonConfig,
    pub telemetry: TelemetryConfig,
    pub batch: BatchConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("CHAT_CENTRAL_SOCKET") {
            if !value.is_empty() {
                config.daemon.socket_path = value;
            }
        }
        if let Ok(value) = env::var("CHAT_CENTRAL_DATA_DIR") {
            if !value.is_empty() {
                config.storage.data_dir = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Path of the embedded store file under the data directory.
    pub fn store_path(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join("store.redb")
    }

    /// Directory for daemon runtime artifacts (pid file, log file).
    pub fn runtime_dir(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join("runtime")
    }
}
