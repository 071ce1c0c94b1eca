use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, Result};

/// Locator for a checkpoint version: a thread plus an optional checkpoint id.
///
/// Without a `checkpoint_id` the locator addresses the latest checkpoint of
/// the thread. `put` returns a locator pointing at the row it just wrote, so
/// callers can chain subsequent writes from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Identifier of an independent execution lineage. Never empty.
    pub thread_id: String,
    /// Version key within the thread, lexically sortable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: None,
        }
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Fail fast on a malformed locator.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.thread_id.is_empty() {
            return Err(CheckpointError::InvalidArgument(
                "thread_id must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The checkpoint id a `before` bound refers to.
    pub(crate) fn before_id(&self) -> Result<&str> {
        self.checkpoint_id.as_deref().ok_or_else(|| {
            CheckpointError::InvalidArgument("`before` locator requires a checkpoint_id".into())
        })
    }
}
