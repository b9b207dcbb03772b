pub mod error;
pub mod export;
pub mod import;
pub mod manifest;

pub use error::{ArchiveError, ArchiveResult};
pub use export::{build_archive, collect_selection, export_filename, export_store, ExportBundle};
pub use import::{
    import_archive, read_archive, ImportConflict, ImportCounts, ImportReport, ImportStrategy,
    ParsedArchive,
};
pub use manifest::{ArchivedConversation, ExportScope, ExportStats, Manifest, ARCHIVE_VERSION};
