use async_trait::async_trait;

use crate::config::CheckpointConfig;
use crate::error::Result;
use crate::types::{Checkpoint, CheckpointMetadata, CheckpointTuple, MetadataFilter};

/// Storage backend contract for checkpoint persistence.
///
/// Implementations must be thread-safe (`Send + Sync`). Absence is a normal
/// result (`None` / empty `Vec`), never an error.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch one checkpoint. With a `checkpoint_id` in the locator the exact
    /// row is returned; without one, the latest checkpoint of the thread.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List a thread's checkpoints, most recent first. `before` restricts the
    /// result to checkpoints older than the given locator; `limit` caps the
    /// count (zero or absent means unbounded).
    async fn list(
        &self,
        config: &CheckpointConfig,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Search across all threads for checkpoints whose metadata document
    /// matches every key/value pair in `filter`, most recent first.
    async fn search(
        &self,
        filter: &MetadataFilter,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Upsert a checkpoint keyed by `(config.thread_id, checkpoint.id)`. The
    /// incoming locator's `checkpoint_id` becomes the new row's parent
    /// pointer. Returns the locator of the written checkpoint.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;
}
