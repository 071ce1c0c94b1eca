use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::config::CheckpointConfig;
use crate::error::Result;
use crate::saver::CheckpointSaver;
use crate::search::metadata_matches;
use crate::types::{Checkpoint, CheckpointMetadata, CheckpointTuple, MetadataFilter};

struct StoredCheckpoint {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    parent_checkpoint_id: Option<String>,
}

/// In-memory checkpoint saver for testing and short-lived workflows.
///
/// Thread-safe via `RwLock`. All data is lost when the saver is dropped.
pub struct MemorySaver {
    /// Map: thread_id → checkpoints ordered by checkpoint id (ascending).
    data: RwLock<HashMap<String, Vec<StoredCheckpoint>>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySaver {
    fn default() -> Self {
        Self::new()
    }
}

fn to_tuple(thread_id: &str, stored: &StoredCheckpoint) -> CheckpointTuple {
    CheckpointTuple {
        config: CheckpointConfig::new(thread_id).with_checkpoint_id(&stored.checkpoint.id),
        checkpoint: stored.checkpoint.clone(),
        metadata: stored.metadata.clone(),
        parent_config: stored
            .parent_checkpoint_id
            .as_ref()
            .map(|parent| CheckpointConfig::new(thread_id).with_checkpoint_id(parent)),
    }
}

#[async_trait]
impl CheckpointSaver for MemorySaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        config.validate()?;
        let data = self.data.read().unwrap();
        let Some(thread) = data.get(&config.thread_id) else {
            return Ok(None);
        };
        let stored = match &config.checkpoint_id {
            Some(id) => thread.iter().find(|s| &s.checkpoint.id == id),
            None => thread.last(),
        };
        Ok(stored.map(|s| to_tuple(&config.thread_id, s)))
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        config.validate()?;
        let before_id = before.map(|b| b.before_id().map(str::to_owned)).transpose()?;
        let data = self.data.read().unwrap();
        let Some(thread) = data.get(&config.thread_id) else {
            return Ok(Vec::new());
        };
        let tuples = thread
            .iter()
            .rev()
            .filter(|s| match &before_id {
                Some(bound) => s.checkpoint.id < *bound,
                None => true,
            })
            .map(|s| to_tuple(&config.thread_id, s));
        Ok(match limit {
            Some(n) if n > 0 => tuples.take(n).collect(),
            _ => tuples.collect(),
        })
    }

    async fn search(
        &self,
        filter: &MetadataFilter,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let before_id = before.map(|b| b.before_id().map(str::to_owned)).transpose()?;
        let data = self.data.read().unwrap();
        let mut tuples = Vec::new();
        for (thread_id, thread) in data.iter() {
            for stored in thread {
                if let Some(bound) = &before_id {
                    if stored.checkpoint.id >= *bound {
                        continue;
                    }
                }
                let doc = stored.metadata.to_document()?;
                if metadata_matches(&doc, filter) {
                    tuples.push(to_tuple(thread_id, stored));
                }
            }
        }
        tuples.sort_by(|a, b| b.checkpoint.id.cmp(&a.checkpoint.id));
        if let Some(n) = limit {
            if n > 0 {
                tuples.truncate(n);
            }
        }
        Ok(tuples)
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        config.validate()?;
        let stored = StoredCheckpoint {
            checkpoint,
            metadata,
            parent_checkpoint_id: config.checkpoint_id.clone(),
        };
        let saved = CheckpointConfig::new(&config.thread_id)
            .with_checkpoint_id(&stored.checkpoint.id);

        let mut data = self.data.write().unwrap();
        let thread = data.entry(config.thread_id.clone()).or_default();

        // Replace if the same id exists, otherwise insert in order
        if let Some(pos) = thread
            .iter()
            .position(|s| s.checkpoint.id == stored.checkpoint.id)
        {
            thread[pos] = stored;
        } else {
            thread.push(stored);
            thread.sort_by(|a, b| a.checkpoint.id.cmp(&b.checkpoint.id));
        }
        Ok(saved)
    }
}
