//! Batch-fetch orchestration.
//!
//! The orchestrator never sees a response: it asks a fetcher context to
//! replay the detail request, then watches the store until the body arrives
//! through the normal ingest path (or the poll window closes). A batch is
//! cancellable by token replacement; workers notice at the next yield point.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use chatcentral_archive::{export_store, ExportScope};
use chatcentral_config::BatchConfig;
use chatcentral_store::{
    Conversation, ConversationFilter, ConversationOrder, DetailStatus, Page, Platform, Store,
    KV_CLAUDE_ORG_ID,
};

use crate::error::{ErrorKind, RuntimeError};
use crate::events::{BatchProgress, BatchStatus, BroadcastEvent, FetchMode};

/// An execution environment in which origin-authenticated detail requests can
/// be replayed.
#[async_trait]
pub trait FetcherContext: Send + Sync {
    async fn dispatch_fetch(&self, url: &str) -> Result<(), RuntimeError>;
}

/// Locates (or creates) fetcher contexts per platform.
#[async_trait]
pub trait FetcherHub: Send + Sync {
    async fn acquire(&self, platform: Platform) -> Result<Arc<dyn FetcherContext>, RuntimeError>;
    /// Tear down whatever `acquire` created. Contexts that merely wrap an
    /// existing client are released as a no-op.
    async fn release(&self, platform: Platform, context: Arc<dyn FetcherContext>);
}

/// The per-platform strategy table.
#[derive(Debug, Clone)]
pub struct PlatformPlan {
    pub platform: Platform,
    pub mode: FetchMode,
    pub poll_timeout: Duration,
    pub fetch_interval: Duration,
    /// Claude's detail endpoint is org-scoped; the batch cannot start without
    /// a stored org hint.
    pub needs_org_precheck: bool,
}

impl PlatformPlan {
    pub fn for_platform(platform: Platform, config: &BatchConfig) -> Self {
        let slug = platform.slug();
        Self {
            platform,
            mode: match platform {
                Platform::Gemini => FetchMode::Navigate,
                Platform::Claude | Platform::ChatGpt => FetchMode::DispatchFetch,
            },
            poll_timeout: Duration::from_secs(config.poll_timeout_secs_for(slug)),
            fetch_interval: Duration::from_millis(config.fetch_interval_ms_for(slug)),
            needs_org_precheck: platform == Platform::Claude,
        }
    }

    /// Tab URL patterns the external fetcher matches against.
    pub fn tab_patterns(&self) -> Vec<String> {
        self.platform
            .base_urls()
            .iter()
            .map(|base| format!("{base}*"))
            .collect()
    }
}

/// Opaque identifier of one batch pass.
pub type BatchToken = Uuid;

/// Holds the active batch token. Starting a new batch replaces the token;
/// cancellation clears it.
#[derive(Debug, Clone, Default)]
pub struct BatchController {
    active: Arc<Mutex<Option<BatchToken>>>,
}

impl BatchController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token as the active batch, preempting any running one.
    pub fn begin(&self) -> BatchToken {
        let token = Uuid::new_v4();
        *self.lock() = Some(token);
        token
    }

    pub fn cancel(&self) {
        *self.lock() = None;
    }

    pub fn is_active(&self, token: BatchToken) -> bool {
        *self.lock() == Some(token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<BatchToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn emit(events: &broadcast::Sender<BroadcastEvent>, progress: BatchProgress) {
    // Fire-and-forget: an empty bus is not an error.
    let _ = events.send(BroadcastEvent::BatchProgress(progress));
}

/// Drive one batch pass: request bodies for every under-synced conversation
/// of `platform`, then emit a bundled export.
#[allow(clippy::too_many_arguments)]
pub async fn run_batch(
    store: Arc<Store>,
    config: BatchConfig,
    controller: BatchController,
    hub: Arc<dyn FetcherHub>,
    events: broadcast::Sender<BroadcastEvent>,
    platform: Platform,
    limit: Option<usize>,
    token: BatchToken,
) {
    let plan = PlatformPlan::for_platform(platform, &config);
    let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));

    let candidates = match store.list_conversations(
        &ConversationFilter {
            platform: Some(platform),
            ..Default::default()
        },
        ConversationOrder::UpdatedDesc,
        Page::all(),
    ) {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(%err, "batch enumeration failed");
            emit(&events, BatchProgress::error(0, 0, err.to_string()));
            return;
        }
    };
    let mut to_fetch: Vec<Conversation> = candidates
        .into_iter()
        .filter(|c| c.detail_status != DetailStatus::Full)
        .collect();
    if let Some(limit) = limit {
        to_fetch.truncate(limit);
    }
    let total = to_fetch.len();

    let claude_org: Option<String> = if plan.needs_org_precheck {
        match store.kv_get::<String>(KV_CLAUDE_ORG_ID) {
            Ok(Some(org)) => Some(org),
            Ok(None) => {
                let err = RuntimeError::new(
                    ErrorKind::Precheck,
                    "no claude org id captured yet; open claude.ai once and retry",
                );
                warn!(%err, "batch precheck failed");
                emit(&events, BatchProgress::error(0, total, err.to_string()));
                return;
            }
            Err(err) => {
                emit(&events, BatchProgress::error(0, total, err.to_string()));
                return;
            }
        }
    } else {
        None
    };

    let mut context = match hub.acquire(platform).await {
        Ok(context) => context,
        Err(err) => {
            warn!(%err, platform = platform.slug(), "no fetcher context");
            emit(&events, BatchProgress::error(0, total, err.to_string()));
            return;
        }
    };

    info!(
        platform = platform.slug(),
        total,
        mode = ?plan.mode,
        "batch fetch starting"
    );
    emit(&events, BatchProgress::fetching(0, total));
    let mut completed = 0usize;

    for candidate in &to_fetch {
        if !controller.is_active(token) {
            emit(&events, BatchProgress::cancelled(completed, total));
            hub.release(platform, context).await;
            return;
        }

        let Some(url) = platform.detail_url(&candidate.original_id, claude_org.as_deref()) else {
            warn!(id = %candidate.id, "no detail url; skipping");
            completed += 1;
            emit(&events, BatchProgress::fetching(completed, total));
            continue;
        };

        // One retry, through a freshly acquired context.
        let mut dispatched = context.dispatch_fetch(&url).await;
        if let Err(err) = &dispatched {
            warn!(id = %candidate.id, %err, "fetch dispatch failed; reacquiring context");
        }
        if dispatched.is_err() {
            match hub.acquire(platform).await {
                Ok(fresh) => {
                    let stale = std::mem::replace(&mut context, fresh);
                    hub.release(platform, stale).await;
                    dispatched = context.dispatch_fetch(&url).await;
                }
                Err(err) => dispatched = Err(err),
            }
        }

        match dispatched {
            Ok(()) => {
                let deadline = Instant::now() + plan.poll_timeout;
                loop {
                    if !controller.is_active(token) {
                        emit(&events, BatchProgress::cancelled(completed, total));
                        hub.release(platform, context).await;
                        return;
                    }
                    match store.get_conversation(&candidate.id) {
                        Ok(Some(c)) if c.detail_status == DetailStatus::Full => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(id = %candidate.id, %err, "poll read failed");
                            break;
                        }
                    }
                    if Instant::now() >= deadline {
                        let err = RuntimeError::new(
                            ErrorKind::Timeout,
                            format!("body did not arrive within {:?}", plan.poll_timeout),
                        );
                        warn!(id = %candidate.id, %err, "detail poll expired");
                        break;
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
            Err(err) => {
                warn!(id = %candidate.id, %err, "fetch dispatch failed twice; advancing");
            }
        }

        completed += 1;
        emit(&events, BatchProgress::fetching(completed, total));

        if completed < total {
            tokio::time::sleep(plan.fetch_interval).await;
        }
    }

    hub.release(platform, context).await;

    let now = Utc::now().timestamp_millis();
    let (scope, ids) = if limit.is_some() {
        let ids: Vec<String> = to_fetch.iter().map(|c| c.id.clone()).collect();
        (ExportScope::Selected, Some(ids))
    } else {
        (ExportScope::Full, None)
    };
    match export_store(&store, Some(platform), ids.as_deref(), scope, now) {
        Ok(bundle) => {
            info!(
                platform = platform.slug(),
                completed,
                filename = %bundle.filename,
                "batch fetch finished"
            );
            emit(
                &events,
                BatchProgress {
                    status: BatchStatus::Done,
                    completed,
                    total,
                    error: None,
                    archive: Some(BASE64.encode(&bundle.bytes)),
                    filename: Some(bundle.filename),
                },
            );
        }
        Err(err) => {
            let err: RuntimeError = err.into();
            warn!(%err, "batch export failed");
            emit(&events, BatchProgress::error(completed, total, err.to_string()));
        }
    }
}

/// Production hub: contexts forward `FETCH_DETAIL` commands over the
/// broadcast bus to whatever capture client is subscribed. Responses come
/// back through the ingest path.
pub struct BroadcastFetcherHub {
    events: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastFetcherHub {
    pub fn new(events: broadcast::Sender<BroadcastEvent>) -> Self {
        Self { events }
    }
}

struct BroadcastContext {
    platform: Platform,
    mode: FetchMode,
    events: broadcast::Sender<BroadcastEvent>,
}

#[async_trait]
impl FetcherContext for BroadcastContext {
    async fn dispatch_fetch(&self, url: &str) -> Result<(), RuntimeError> {
        self.events
            .send(BroadcastEvent::FetchDetail {
                platform: self.platform,
                mode: self.mode,
                url: url.to_string(),
            })
            .map(|_| ())
            .map_err(|_| {
                RuntimeError::new(ErrorKind::Fetch, "capture client went away mid-dispatch")
            })
    }
}

#[async_trait]
impl FetcherHub for BroadcastFetcherHub {
    async fn acquire(&self, platform: Platform) -> Result<Arc<dyn FetcherContext>, RuntimeError> {
        if self.events.receiver_count() == 0 {
            return Err(RuntimeError::new(
                ErrorKind::NoContext,
                format!(
                    "no capture client subscribed for {}",
                    platform.display_name()
                ),
            ));
        }
        let mode = PlatformPlan::for_platform(platform, &BatchConfig::default()).mode;
        Ok(Arc::new(BroadcastContext {
            platform,
            mode,
            events: self.events.clone(),
        }))
    }

    async fn release(&self, _platform: Platform, _context: Arc<dyn FetcherContext>) {}
}
