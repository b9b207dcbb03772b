//! Typed client for the daemon's unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::warn;

use chatcentral_store::{Conversation, Message, Platform, StoreStats};

use crate::commands::{
    AcceptedReply, CaptureReply, ConversationReply, ConversationsReply, MessagesReply, Request,
    SearchReply, SearchResultEntry, SearchWithMatchesReply, TagsReply,
};
use crate::events::BroadcastEvent;
use crate::ingest::CapturePayload;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub async fn connect_with_backoff(&self, max_attempts: usize) -> Result<()> {
        let mut delay = Duration::from_millis(100);
        for attempt in 0..max_attempts.max(1) {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if attempt + 1 == max_attempts.max(1) {
                        return Err(err.into());
                    }
                    warn!(attempt, ?err, "daemon connect failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
            }
        }
        Ok(())
    }

    pub async fn capture(
        &self,
        url: impl Into<String>,
        data: CapturePayload,
        ts: i64,
    ) -> Result<CaptureReply> {
        self.request(&Request::CaptureApiResponse {
            url: url.into(),
            data,
            ts,
        })
        .await
    }

    pub async fn get_conversations(
        &self,
        platform: Option<Platform>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Conversation>> {
        let reply: ConversationsReply = self
            .request(&Request::GetConversations {
                platform,
                limit,
                offset,
            })
            .await?;
        Ok(reply.conversations)
    }

    pub async fn get_recent(&self, limit: Option<usize>) -> Result<Vec<Conversation>> {
        let reply: ConversationsReply = self
            .request(&Request::GetRecentConversations { limit })
            .await?;
        Ok(reply.conversations)
    }

    pub async fn get_messages(&self, conversation_id: impl Into<String>) -> Result<Vec<Message>> {
        let reply: MessagesReply = self
            .request(&Request::GetMessages {
                conversation_id: conversation_id.into(),
            })
            .await?;
        Ok(reply.messages)
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        self.request(&Request::GetStats {}).await
    }

    pub async fn search(&self, query: impl Into<String>) -> Result<Vec<Conversation>> {
        let reply: SearchReply = self
            .request(&Request::Search {
                query: query.into(),
                filters: None,
            })
            .await?;
        Ok(reply.results)
    }

    pub async fn search_with_matches(
        &self,
        query: impl Into<String>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResultEntry>> {
        let reply: SearchWithMatchesReply = self
            .request(&Request::SearchWithMatches {
                query: query.into(),
                limit,
            })
            .await?;
        Ok(reply.results)
    }

    pub async fn toggle_favorite(
        &self,
        conversation_id: impl Into<String>,
        value: Option<bool>,
    ) -> Result<Option<Conversation>> {
        let reply: ConversationReply = self
            .request(&Request::ToggleFavorite {
                conversation_id: conversation_id.into(),
                value,
            })
            .await?;
        Ok(reply.conversation)
    }

    pub async fn update_tags(
        &self,
        conversation_id: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<Option<Conversation>> {
        let reply: ConversationReply = self
            .request(&Request::UpdateTags {
                conversation_id: conversation_id.into(),
                tags,
            })
            .await?;
        Ok(reply.conversation)
    }

    pub async fn all_tags(&self) -> Result<Vec<String>> {
        let reply: TagsReply = self.request(&Request::GetAllTags {}).await?;
        Ok(reply.tags)
    }

    pub async fn batch_fetch_and_export(
        &self,
        platform: Platform,
        limit: Option<usize>,
    ) -> Result<bool> {
        let reply: AcceptedReply = self
            .request(&Request::BatchFetchAndExport { platform, limit })
            .await?;
        Ok(reply.accepted)
    }

    pub async fn batch_cancel(&self) -> Result<bool> {
        let reply: AcceptedReply = self.request(&Request::BatchFetchCancel {}).await?;
        Ok(reply.accepted)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let _: AcceptedReply = self.request(&Request::Shutdown {}).await?;
        Ok(())
    }

    /// Open a persistent subscription and forward every broadcast event.
    /// Runs until the connection drops or the receiver closes.
    pub async fn subscribe(&self, tx: mpsc::UnboundedSender<BroadcastEvent>) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = serde_json::to_string(&Request::Subscribe {})?;
        write_half.write_all(request.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: BroadcastEvent = match serde_json::from_str(trimmed) {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "subscribe: unreadable event");
                    continue;
                }
            };
            if tx.send(event).is_err() {
                break; // subscriber dropped the receiver
            }
        }
        Ok(())
    }

    async fn request<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let rendered = serde_json::to_string(request)?;
        write_half.write_all(rendered.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            bail!("daemon closed the connection without replying");
        }
        let value: serde_json::Value = serde_json::from_str(line.trim())?;
        if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
            let message = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown daemon error");
            bail!("{message}");
        }
        Ok(serde_json::from_value(value)?)
    }
}
