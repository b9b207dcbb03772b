pub mod batch;
pub mod client;
pub mod commands;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod ingest;
pub mod server;

pub use batch::{
    run_batch, BatchController, BatchToken, BroadcastFetcherHub, FetcherContext, FetcherHub,
    PlatformPlan,
};
pub use client::DaemonClient;
pub use commands::{
    AcceptedReply, CaptureReply, ConversationReply, ConversationsReply, ErrorReply, MessagesReply,
    Request, SearchFilters, SearchReply, SearchResultEntry, SearchWithMatchesReply, TagsReply,
};
pub use dispatch::Dispatcher;
pub use error::{ErrorKind, RuntimeError};
pub use events::{BatchProgress, BatchStatus, BroadcastEvent, FetchMode};
pub use ingest::{
    extract_claude_org_id, ingest_capture, CaptureMode, CapturePayload, IngestOutcome,
};
pub use server::run_daemon;
