//! Checkpoint writer
//!
//! A checkpoint rewrites both artifacts of the current run: the state artifact
//! first, then the clean output derived from it.

use crate::output::{build_output, Normalizer};
use crate::storage::{write_atomic, EntityStore, RunId, SnapshotLayout, StorageResult};

/// Persists the store and its clean projection for `run`
pub fn write_checkpoint(
    layout: &SnapshotLayout,
    run: RunId,
    store: &EntityStore,
    normalizer: &dyn Normalizer,
) -> StorageResult<()> {
    store.save(&layout.state_path(run))?;
    write_atomic(&layout.output_path(run), &render_output(store, normalizer)?)?;
    Ok(())
}

/// Serializes the clean projection of `store`
pub fn render_output(store: &EntityStore, normalizer: &dyn Normalizer) -> StorageResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(&build_output(store, normalizer))?;
    bytes.push(b'\n');
    Ok(bytes)
}
