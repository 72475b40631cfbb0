//! `gemrelay rotate`: Delete conversations older than a retention window.

use chrono::Utc;
use gemrelay_store::{ConversationStore, Retention};
use std::path::Path;
use tracing::info;

pub fn run(path: &Path, keep: &str) -> Result<(), Box<dyn std::error::Error>> {
    let retention: Retention = keep.parse()?;
    let store = ConversationStore::open_path(path)?;

    let report = store.rotate(retention, Utc::now())?;
    info!(path = %path.display(), keep, "Rotation finished");
    println!(
        "Deleted {} of {} records ({} skipped, {} orphaned index entries removed)",
        report.deleted, report.examined, report.skipped, report.orphans_removed
    );
    Ok(())
}
