//! Request execution behind the dispatch surface.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use chatcentral_config::AppConfig;
use chatcentral_search::{parse_query, run_search};
use chatcentral_store::tags::update_tags;
use chatcentral_store::{
    toggle_favorite, ConversationFilter, ConversationOrder, Page, Store,
};

use crate::batch::{run_batch, BatchController, FetcherHub};
use crate::commands::{
    AcceptedReply, CaptureReply, ConversationReply, ConversationsReply, ErrorReply, MessagesReply,
    Request, SearchFilters, SearchReply, SearchResultEntry, SearchWithMatchesReply, TagsReply,
};
use crate::error::{ErrorKind, RuntimeError};
use crate::events::BroadcastEvent;
use crate::ingest::ingest_capture;

const DEFAULT_LIST_LIMIT: usize = 50;
const DEFAULT_RECENT_LIMIT: usize = 10;

/// Executes validated requests against the store and the batch controller.
/// One instance is shared by every connection.
pub struct Dispatcher {
    store: Arc<Store>,
    config: AppConfig,
    controller: BatchController,
    hub: Arc<dyn FetcherHub>,
    events: broadcast::Sender<BroadcastEvent>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        config: AppConfig,
        controller: BatchController,
        hub: Arc<dyn FetcherHub>,
        events: broadcast::Sender<BroadcastEvent>,
    ) -> Self {
        Self {
            store,
            config,
            controller,
            hub,
            events,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.events.subscribe()
    }

    /// Parse-and-execute one raw message. Schema rejection carries no side
    /// effects and always renders the same stable error string.
    pub async fn handle_raw(&self, raw: &str) -> Value {
        let request: Request = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "rejecting malformed dispatch message");
                return reply(&ErrorReply::new("Invalid message format"));
            }
        };
        self.handle(request).await
    }

    pub async fn handle(&self, request: Request) -> Value {
        match self.execute(request).await {
            Ok(value) => value,
            Err(err) => reply(&ErrorReply::new(err.to_string())),
        }
    }

    async fn execute(&self, request: Request) -> Result<Value, RuntimeError> {
        match request {
            Request::CaptureApiResponse { url, data, ts } => {
                let outcome = match ingest_capture(&self.store, &url, &data, ts) {
                    Ok(outcome) => outcome,
                    Err(err) if err.kind == ErrorKind::Store => return Err(err),
                    Err(err) => {
                        // Parser-level failure: swallow with a warning, store
                        // unchanged.
                        warn!(url, %err, "capture rejected; response dropped");
                        return Ok(reply(&CaptureReply {
                            success: true,
                            count: Some(0),
                        }));
                    }
                };
                for conversation_id in outcome.detail_synced {
                    let _ = self
                        .events
                        .send(BroadcastEvent::DetailSynced { conversation_id });
                }
                Ok(reply(&CaptureReply {
                    success: true,
                    count: Some(outcome.stored),
                }))
            }

            Request::GetConversations {
                platform,
                limit,
                offset,
            } => {
                let conversations = self.store.list_conversations(
                    &ConversationFilter {
                        platform,
                        ..Default::default()
                    },
                    ConversationOrder::UpdatedDesc,
                    Page::new(
                        offset.unwrap_or(0),
                        limit.unwrap_or(DEFAULT_LIST_LIMIT),
                    ),
                )?;
                Ok(reply(&ConversationsReply { conversations }))
            }

            Request::GetMessages { conversation_id } => {
                if self.store.get_conversation(&conversation_id)?.is_none() {
                    return Err(RuntimeError::new(
                        ErrorKind::NotFound,
                        format!("conversation {conversation_id} not found"),
                    ));
                }
                let messages = self.store.get_messages_by_conversation(&conversation_id)?;
                Ok(reply(&MessagesReply { messages }))
            }

            Request::GetStats {} => {
                let stats = self.store.stats()?;
                Ok(serde_json::to_value(stats)
                    .map_err(|err| RuntimeError::new(ErrorKind::Store, err.to_string()))?)
            }

            Request::Search { query, filters } => {
                let query = apply_filters(parse_query(&query), filters);
                let hits = run_search(&self.store, &query, None, false)?;
                Ok(reply(&SearchReply {
                    results: hits.into_iter().map(|hit| hit.conversation).collect(),
                }))
            }

            Request::SearchWithMatches { query, limit } => {
                let query = parse_query(&query);
                let hits = run_search(&self.store, &query, limit, true)?;
                Ok(reply(&SearchWithMatchesReply {
                    results: hits
                        .into_iter()
                        .map(|hit| SearchResultEntry {
                            conversation: hit.conversation,
                            matches: hit.matches,
                        })
                        .collect(),
                }))
            }

            Request::GetRecentConversations { limit } => {
                let conversations = self.store.list_conversations(
                    &ConversationFilter::default(),
                    ConversationOrder::UpdatedDesc,
                    Page::new(0, limit.unwrap_or(DEFAULT_RECENT_LIMIT)),
                )?;
                Ok(reply(&ConversationsReply { conversations }))
            }

            Request::ToggleFavorite {
                conversation_id,
                value,
            } => {
                let now = Utc::now().timestamp_millis();
                let conversation = toggle_favorite(&self.store, &conversation_id, value, now)?;
                Ok(reply(&ConversationReply {
                    success: true,
                    conversation: Some(conversation),
                }))
            }

            Request::UpdateTags {
                conversation_id,
                tags,
            } => {
                let conversation = update_tags(&self.store, &conversation_id, &tags)?;
                Ok(reply(&ConversationReply {
                    success: true,
                    conversation: Some(conversation),
                }))
            }

            Request::GetAllTags {} => Ok(reply(&TagsReply {
                tags: self.store.all_tags()?,
            })),

            Request::BatchFetchAndExport { platform, limit } => {
                let token = self.controller.begin();
                let store = self.store.clone();
                let config = self.config.batch.clone();
                let controller = self.controller.clone();
                let hub = self.hub.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    run_batch(store, config, controller, hub, events, platform, limit, token)
                        .await;
                });
                Ok(reply(&AcceptedReply { accepted: true }))
            }

            Request::BatchFetchCancel {} => {
                self.controller.cancel();
                Ok(reply(&AcceptedReply { accepted: true }))
            }

            // Control verbs are handled at the connection layer; acknowledge
            // them here so a stray call is still well-formed.
            Request::Subscribe {} | Request::Shutdown {} => {
                Ok(reply(&AcceptedReply { accepted: true }))
            }
        }
    }
}

fn apply_filters(
    mut query: chatcentral_search::SearchQuery,
    filters: Option<SearchFilters>,
) -> chatcentral_search::SearchQuery {
    let Some(filters) = filters else {
        return query;
    };
    if let Some(platform) = filters.platform {
        query.platform = Some(platform);
    }
    if let Some(favorite_only) = filters.favorite_only {
        query.favorite_only = query.favorite_only || favorite_only;
    }
    if let Some(tags) = filters.tags {
        for tag in tags {
            if !query.tags.contains(&tag) {
                query.tags.push(tag);
            }
        }
    }
    query
}

fn reply<T: serde::Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|err| {
        warn!(%err, "reply serialization failed");
        serde_json::json!({ "success": false, "error": "Store" })
    })
}
