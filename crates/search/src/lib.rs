pub mod engine;
pub mod query;

pub use engine::{run_search, MatchSnippet, SearchHit, SnippetKind};
pub use query::{parse_query, SearchQuery};
