mod daemon;
mod store_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use chatcentral_config::AppConfig;
use chatcentral_runtime::{BroadcastEvent, DaemonClient, ErrorKind, RuntimeError};
use chatcentral_store::Platform;

const DEFAULT_CONFIG_PATH: &str = "chat-central.toml";

#[derive(Debug, Parser)]
#[command(
    name = "chat-central",
    version,
    about = "Local aggregation daemon for Claude, ChatGPT and Gemini conversation traffic"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Run the daemon in the foreground.
    #[command(hide = true)]
    Run,
    /// Show store statistics.
    Stats,
    /// List conversations, most recently updated first.
    List {
        #[arg(long, value_enum)]
        platform: Option<CliPlatform>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Ranked search. Operators: platform:, is:favorite, tag:, before:, after:.
    Search {
        query: String,
        /// Include match snippets in the output.
        #[arg(long)]
        matches: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the messages of one conversation.
    Messages {
        conversation_id: String,
    },
    /// Toggle (or set) the favorite flag of a conversation.
    Favorite {
        conversation_id: String,
        /// Set explicitly instead of toggling.
        #[arg(long)]
        set: Option<bool>,
    },
    /// Inspect or assign tags.
    Tags {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Drive a batch-fetch pass and save the resulting archive.
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
    /// Export conversations to a ZIP archive (daemon must be stopped).
    Export {
        #[arg(long, value_enum)]
        platform: Option<CliPlatform>,
        /// Write markdown renditions instead of JSON records.
        #[arg(long)]
        markdown: bool,
        /// Output path; defaults to the canonical export filename.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import an exported archive (daemon must be stopped).
    Import {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "merge")]
        strategy: CliImportStrategy,
    },
    /// Delete captured data (daemon must be stopped).
    Clear {
        #[arg(long, value_enum)]
        platform: Option<CliPlatform>,
        #[arg(long)]
        yes: bool,
    },
    /// Read or write UI preferences (daemon must be stopped).
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DaemonCommands {
    Start,
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Subcommand)]
enum TagCommands {
    /// Print the global tag set.
    List,
    /// Replace a conversation's tags.
    Set {
        conversation_id: String,
        tags: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum BatchCommands {
    /// Start a batch pass and stream progress until it finishes.
    Run {
        #[arg(value_enum)]
        platform: CliPlatform,
        /// Only process the N most recently updated under-synced records.
        #[arg(long)]
        limit: Option<usize>,
        /// Directory the archive is saved into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Cancel the active batch pass.
    Cancel,
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print or set the UI theme (light, dark, system).
    Theme { value: Option<String> },
    /// Print or set widget enablement.
    Widget { value: Option<bool> },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPlatform {
    Claude,
    Chatgpt,
    Gemini,
}

impl From<CliPlatform> for Platform {
    fn from(value: CliPlatform) -> Self {
        match value {
            CliPlatform::Claude => Platform::Claude,
            CliPlatform::Chatgpt => Platform::ChatGpt,
            CliPlatform::Gemini => Platform::Gemini,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliImportStrategy {
    Merge,
    Replace,
    Skip,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Validation: bad config file: {err}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    if let Err(err) = run(cli, config).await {
        eprintln!("{}: {err:#}", error_kind(&err));
        std::process::exit(1);
    }
}

/// Stable error-kind string for the exit message.
fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(runtime_err) = err.downcast_ref::<RuntimeError>() {
        return runtime_err.kind.as_str();
    }
    if let Some(store_err) = err.downcast_ref::<chatcentral_store::StoreError>() {
        return match store_err {
            chatcentral_store::StoreError::NotFound(_) => ErrorKind::NotFound.as_str(),
            chatcentral_store::StoreError::Validation(_) => ErrorKind::Validation.as_str(),
            _ => ErrorKind::Store.as_str(),
        };
    }
    if let Some(archive_err) = err.downcast_ref::<chatcentral_archive::ArchiveError>() {
        return match archive_err {
            chatcentral_archive::ArchiveError::Validation(_) => ErrorKind::Validation.as_str(),
            _ => ErrorKind::Store.as_str(),
        };
    }
    ErrorKind::Store.as_str()
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let client = DaemonClient::new(&config.daemon.socket_path);

    match cli.command {
        Commands::Daemon { command } => match command {
            DaemonCommands::Start => daemon::daemon_start(&cli.config, &config),
            DaemonCommands::Stop => daemon::daemon_stop(&config).await,
            DaemonCommands::Restart => {
                daemon::daemon_stop(&config).await?;
                daemon::daemon_start(&cli.config, &config)
            }
            DaemonCommands::Status => daemon::daemon_status(&config),
        },
        Commands::Run => chatcentral_runtime::run_daemon(config).await,

        Commands::Stats => {
            let stats = client.get_stats().await?;
            println!("conversations: {}", stats.total_conversations);
            println!("messages:      {}", stats.total_messages);
            for (platform, count) in &stats.by_platform {
                println!("- {platform}: {count}");
            }
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                println!("updated range: {oldest} .. {newest}");
            }
            Ok(())
        }

        Commands::List {
            platform,
            limit,
            offset,
        } => {
            let conversations = client
                .get_conversations(platform.map(Into::into), Some(limit), Some(offset))
                .await?;
            for c in conversations {
                let favorite = if c.is_favorite { "★" } else { " " };
                println!(
                    "{favorite} [{}] {}  ({} messages, {:?})",
                    c.platform.slug(),
                    if c.title.is_empty() { &c.id } else { &c.title },
                    c.message_count,
                    c.detail_status,
                );
            }
            Ok(())
        }

        Commands::Search {
            query,
            matches,
            limit,
        } => {
            if matches {
                let results = client.search_with_matches(query, limit).await?;
                for entry in results {
                    println!("{} — {}", entry.conversation.id, entry.conversation.title);
                    for snippet in entry.matches {
                        println!("    [{:?}] {}", snippet.kind, snippet.text);
                    }
                }
            } else {
                let results = client.search(query).await?;
                for c in results {
                    println!("{} — {}", c.id, c.title);
                }
            }
            Ok(())
        }

        Commands::Messages { conversation_id } => {
            let messages = client.get_messages(conversation_id).await?;
            for m in messages {
                println!("[{:?} @ {}] {}", m.role, m.created_at, m.content);
            }
            Ok(())
        }

        Commands::Favorite {
            conversation_id,
            set,
        } => {
            let conversation = client.toggle_favorite(conversation_id, set).await?;
            if let Some(c) = conversation {
                println!("{} favorite = {}", c.id, c.is_favorite);
            }
            Ok(())
        }

        Commands::Tags { command } => match command {
            TagCommands::List => {
                for tag in client.all_tags().await? {
                    println!("{tag}");
                }
                Ok(())
            }
            TagCommands::Set {
                conversation_id,
                tags,
            } => {
                let conversation = client.update_tags(conversation_id, tags).await?;
                if let Some(c) = conversation {
                    println!("{} tags = {:?}", c.id, c.tags);
                }
                Ok(())
            }
        },

        Commands::Batch { command } => match command {
            BatchCommands::Run {
                platform,
                limit,
                out_dir,
            } => batch_run(&client, platform.into(), limit, out_dir).await,
            BatchCommands::Cancel => {
                client.batch_cancel().await?;
                println!("batch cancel requested");
                Ok(())
            }
        },

        Commands::Export {
            platform,
            markdown,
            out,
        } => store_cmds::export(&config, platform.map(Into::into), markdown, out),
        Commands::Import { path, strategy } => {
            let strategy = match strategy {
                CliImportStrategy::Merge => chatcentral_archive::ImportStrategy::Merge,
                CliImportStrategy::Replace => chatcentral_archive::ImportStrategy::Replace,
                CliImportStrategy::Skip => chatcentral_archive::ImportStrategy::Skip,
            };
            store_cmds::import(&config, &path, strategy)
        }
        Commands::Clear { platform, yes } => {
            store_cmds::clear(&config, platform.map(Into::into), yes)
        }
        Commands::Config { command } => store_cmds::config_cmd(&config, command),
    }
}

/// Subscribe for progress, kick off the batch, stream progress lines, and
/// save the archive when the final event lands.
async fn batch_run(
    client: &DaemonClient,
    platform: Platform,
    limit: Option<usize>,
    out_dir: PathBuf,
) -> Result<()> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    client.connect_with_backoff(3).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscriber = {
        let client = client.clone();
        tokio::spawn(async move {
            let _ = client.subscribe(tx).await;
        })
    };
    // Give the subscription a moment to attach before events start flowing.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    client.batch_fetch_and_export(platform, limit).await?;

    let mut outcome = Ok(());
    while let Some(event) = rx.recv().await {
        let BroadcastEvent::BatchProgress(progress) = event else {
            continue;
        };
        match progress.status {
            chatcentral_runtime::BatchStatus::Fetching => {
                println!("fetching {}/{}", progress.completed, progress.total);
            }
            chatcentral_runtime::BatchStatus::Done => {
                if let (Some(archive), Some(filename)) = (progress.archive, progress.filename) {
                    let bytes = BASE64.decode(archive.as_bytes())?;
                    let path = out_dir.join(filename);
                    std::fs::write(&path, bytes)?;
                    println!("archive saved to {}", path.display());
                }
                break;
            }
            chatcentral_runtime::BatchStatus::Cancelled => {
                println!(
                    "batch cancelled at {}/{}",
                    progress.completed, progress.total
                );
                break;
            }
            chatcentral_runtime::BatchStatus::Error => {
                outcome = Err(anyhow::anyhow!(
                    "{}",
                    progress.error.unwrap_or_else(|| "batch failed".to_string())
                ));
                break;
            }
        }
    }

    subscriber.abort();
    outcome
}
