//! Unix domain socket connection handling.
//!
//! The protocol is line-delimited JSON: one request line in, one reply line
//! out — except `SUBSCRIBE`, which holds the connection open and streams
//! broadcast events until the client goes away.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::commands::{AcceptedReply, Request};
use crate::dispatch::Dispatcher;

pub(super) async fn handle_connection(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let raw = line.trim();
    if raw.is_empty() {
        return Ok(());
    }

    // Peek at the control verbs; everything else goes through the dispatcher
    // (including the InvalidFormat rejection path).
    match serde_json::from_str::<Request>(raw) {
        Ok(Request::Subscribe {}) => {
            let mut rx = dispatcher.subscribe();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let rendered = serde_json::to_string(&event)?;
                        if write_half.write_all(rendered.as_bytes()).await.is_err()
                            || write_half.write_all(b"\n").await.is_err()
                        {
                            break; // client disconnected
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(n, "subscriber lagged; {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        Ok(Request::Shutdown {}) => {
            send_line(
                &mut write_half,
                &serde_json::to_value(AcceptedReply { accepted: true })?,
            )
            .await?;
            let _ = shutdown_tx.send(true);
        }
        _ => {
            let reply = dispatcher.handle_raw(raw).await;
            send_line(&mut write_half, &reply).await?;
        }
    }

    Ok(())
}

async fn send_line(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    value: &serde_json::Value,
) -> Result<()> {
    let rendered = serde_json::to_string(value)?;
    write_half.write_all(rendered.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await?;
    Ok(())
}
