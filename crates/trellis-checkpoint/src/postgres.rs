use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use crate::saver::CheckpointSaver;
use crate::serializer::{CompatSerializer, Serializer};
use crate::types::{Checkpoint, CheckpointMetadata, CheckpointTuple, MetadataFilter};

const SELECT_COLUMNS: &str =
    "thread_id, checkpoint_id, parent_checkpoint_id, checkpoint_bytes, metadata";

/// PostgreSQL-backed checkpoint saver, feature-gated behind `postgres`.
///
/// Checkpoint payloads go through the configured codec into a BYTEA column;
/// metadata is stored as JSONB so `search` can use native containment
/// matching instead of the SQLite query builder.
pub struct PostgresSaver {
    client: Client,
    serde: Arc<dyn Serializer>,
    _handle: tokio::task::JoinHandle<()>,
}

impl PostgresSaver {
    /// Connect using the `DATABASE_URL` environment variable.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            CheckpointError::InvalidArgument("DATABASE_URL environment variable not set".into())
        })?;
        Self::connect(&url).await
    }

    /// Connect using the given connection URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| CheckpointError::Storage(format!("connection error: {e}")))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {e}");
            }
        });

        let saver = Self {
            client,
            serde: Arc::new(CompatSerializer::new()),
            _handle: handle,
        };
        saver.setup().await?;
        Ok(saver)
    }

    /// Idempotently ensure the checkpoints table exists.
    pub async fn setup(&self) -> Result<()> {
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT NOT NULL,
                    checkpoint_id TEXT NOT NULL,
                    parent_checkpoint_id TEXT,
                    checkpoint_bytes BYTEA,
                    metadata JSONB,
                    PRIMARY KEY (thread_id, checkpoint_id)
                )",
                &[],
            )
            .await
            .map_err(|e| CheckpointError::Storage(format!("create table: {e}")))?;
        Ok(())
    }

    fn row_to_tuple(&self, row: &tokio_postgres::Row) -> Result<CheckpointTuple> {
        let thread_id: String = row.get(0);
        let checkpoint_id: String = row.get(1);
        let parent_checkpoint_id: Option<String> = row.get(2);
        let checkpoint_bytes: Vec<u8> = row.get(3);
        let metadata_value: Option<Value> = row.get(4);

        let checkpoint_value = self.serde.loads(&checkpoint_bytes)?;
        let checkpoint: Checkpoint = serde_json::from_value(checkpoint_value)
            .map_err(|e| CheckpointError::Decode(format!("checkpoint payload: {e}")))?;
        let metadata = match metadata_value {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| CheckpointError::Decode(format!("metadata payload: {e}")))?,
            None => CheckpointMetadata::default(),
        };
        let parent_config = parent_checkpoint_id
            .map(|parent| CheckpointConfig::new(&thread_id).with_checkpoint_id(parent));
        Ok(CheckpointTuple {
            config: CheckpointConfig::new(thread_id).with_checkpoint_id(checkpoint_id),
            checkpoint,
            metadata,
            parent_config,
        })
    }
}

#[async_trait]
impl CheckpointSaver for PostgresSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        config.validate()?;
        let row = match &config.checkpoint_id {
            Some(id) => self
                .client
                .query_opt(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM checkpoints \
                         WHERE thread_id = $1 AND checkpoint_id = $2"
                    ),
                    &[&config.thread_id, id],
                )
                .await,
            None => self
                .client
                .query_opt(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM checkpoints \
                         WHERE thread_id = $1 ORDER BY checkpoint_id DESC LIMIT 1"
                    ),
                    &[&config.thread_id],
                )
                .await,
        }
        .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?;

        row.map(|row| self.row_to_tuple(&row)).transpose()
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        config.validate()?;
        let mut query = format!("SELECT {SELECT_COLUMNS} FROM checkpoints WHERE thread_id = $1");
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&config.thread_id];

        let before_id;
        if let Some(before) = before {
            before_id = before.before_id()?.to_owned();
            query.push_str(" AND checkpoint_id < $2");
            params.push(&before_id);
        }
        query.push_str(" ORDER BY checkpoint_id DESC");
        let limit_rows;
        if let Some(n) = limit.filter(|&n| n > 0) {
            limit_rows = n as i64;
            query.push_str(&format!(" LIMIT ${}", params.len() + 1));
            params.push(&limit_rows);
        }

        let rows = self
            .client
            .query(&query, &params)
            .await
            .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?;
        rows.iter().map(|row| self.row_to_tuple(row)).collect()
    }

    async fn search(
        &self,
        filter: &MetadataFilter,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        // JSONB containment implements "matches every key/value pair"; the
        // empty filter is contained in every document.
        let filter_value = Value::Object(filter.clone());
        let mut query = format!("SELECT {SELECT_COLUMNS} FROM checkpoints WHERE metadata @> $1");
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&filter_value];

        let before_id;
        if let Some(before) = before {
            before_id = before.before_id()?.to_owned();
            query.push_str(" AND checkpoint_id < $2");
            params.push(&before_id);
        }
        query.push_str(" ORDER BY checkpoint_id DESC");
        let limit_rows;
        if let Some(n) = limit.filter(|&n| n > 0) {
            limit_rows = n as i64;
            query.push_str(&format!(" LIMIT ${}", params.len() + 1));
            params.push(&limit_rows);
        }

        let rows = self
            .client
            .query(&query, &params)
            .await
            .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?;
        rows.iter().map(|row| self.row_to_tuple(row)).collect()
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        config.validate()?;
        let checkpoint_value = serde_json::to_value(&checkpoint)
            .map_err(|e| CheckpointError::Decode(format!("encode checkpoint: {e}")))?;
        let checkpoint_bytes = self.serde.dumps(&checkpoint_value)?;
        let metadata_value = serde_json::to_value(&metadata)
            .map_err(|e| CheckpointError::Decode(format!("encode metadata: {e}")))?;

        tracing::debug!(thread_id = %config.thread_id, checkpoint_id = %checkpoint.id, "saving checkpoint");
        self.client
            .execute(
                "INSERT INTO checkpoints \
                 (thread_id, checkpoint_id, parent_checkpoint_id, checkpoint_bytes, metadata) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (thread_id, checkpoint_id) DO UPDATE SET \
                     parent_checkpoint_id = EXCLUDED.parent_checkpoint_id, \
                     checkpoint_bytes = EXCLUDED.checkpoint_bytes, \
                     metadata = EXCLUDED.metadata",
                &[
                    &config.thread_id,
                    &checkpoint.id,
                    &config.checkpoint_id,
                    &checkpoint_bytes,
                    &metadata_value,
                ],
            )
            .await
            .map_err(|e| CheckpointError::Storage(format!("insert checkpoint: {e}")))?;

        Ok(CheckpointConfig::new(&config.thread_id).with_checkpoint_id(checkpoint.id))
    }
}
