//! Daily snapshot writer: streams the full store into
//! `data/backups/argus-backup-YYYY-MM-DD.json`.

use anyhow::{Context, Result};
use argus_store::{backup_filename, EventStore};
use std::path::{Path, PathBuf};

pub async fn write_snapshot(store: &EventStore, backups_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(backups_dir)
        .with_context(|| format!("failed to create {}", backups_dir.display()))?;
    let path = backups_dir.join(backup_filename(chrono::Local::now().date_naive()));

    let mut file = std::io::BufWriter::new(
        std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?,
    );
    let counts = store.export_to_writer(&mut file, "daily-snapshot").await?;
    use std::io::Write;
    file.flush()?;

    tracing::debug!(
        "snapshot {}: {} events, {} messages",
        path.display(),
        counts.events,
        counts.messages
    );
    Ok(path)
}
