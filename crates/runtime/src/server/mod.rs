//! The chat-central daemon: owns the store, the broadcast bus, and the batch
//! controller, and serves the dispatch surface over a unix domain socket.

mod connection;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use chatcentral_config::AppConfig;
use chatcentral_store::Store;

use crate::batch::{BatchController, BroadcastFetcherHub, FetcherHub};
use crate::dispatch::Dispatcher;
use crate::events::BroadcastEvent;

/// Broadcast channel capacity. Old events are dropped when subscribers lag.
const BROADCAST_CAP: usize = 256;

/// Run the daemon until a `SHUTDOWN` request arrives.
pub async fn run_daemon(config: AppConfig) -> Result<()> {
    let socket_path = PathBuf::from(&config.daemon.socket_path);
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    let store = Arc::new(Store::open(config.store_path())?);
    let (event_tx, _) = broadcast::channel::<BroadcastEvent>(BROADCAST_CAP);
    let controller = BatchController::new();
    let hub: Arc<dyn FetcherHub> = Arc::new(BroadcastFetcherHub::new(event_tx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        store,
        config.clone(),
        controller,
        hub,
        event_tx.clone(),
    ));

    let listener = UnixListener::bind(&socket_path)?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    info!(path = %socket_path.display(), "chat-central daemon listening");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                let (stream, _) = accept?;
                let dispatcher = dispatcher.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        connection::handle_connection(stream, dispatcher, shutdown_tx).await
                    {
                        error!(?err, "daemon connection handler failed");
                    }
                });
            }
        }
    }

    info!("daemon shutting down gracefully");
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
