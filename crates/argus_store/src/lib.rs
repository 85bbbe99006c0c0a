pub mod backup;
pub mod search;
pub mod sqlite;

pub use backup::{
    backup_filename, is_backup_filename, list_backups, prune_backups, read_backup_file,
    BackupCounts, BackupFileInfo, ImportMode, ImportSummary,
};
pub use search::{cosine_similarity, escape_fts_query, rrf_merge};
pub use sqlite::{bytes_to_embedding, embedding_to_bytes, EventStore, NewEvent};
