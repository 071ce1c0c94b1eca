use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use crate::saver::CheckpointSaver;
use crate::search::search_where;
use crate::serializer::{CompatSerializer, Serializer};
use crate::types::{Checkpoint, CheckpointMetadata, CheckpointTuple, MetadataFilter};

const SELECT_COLUMNS: &str =
    "thread_id, checkpoint_id, parent_checkpoint_id, checkpoint_bytes, metadata_bytes";

/// SQLite-backed checkpoint saver.
///
/// The connection is exclusively owned by the saver and wrapped in a mutex;
/// every statement runs under it on a blocking thread via
/// `tokio::task::spawn_blocking`, so writes from one instance are totally
/// ordered and never interleave at statement level. This is a single-process
/// safeguard only — concurrent external processes writing the same database
/// file are not coordinated.
///
/// The schema is created lazily on first use; [`SqliteSaver::setup`] may also
/// be called explicitly.
pub struct SqliteSaver {
    conn: Arc<Mutex<Connection>>,
    serde: Arc<dyn Serializer>,
    is_setup: Arc<AtomicBool>,
}

impl SqliteSaver {
    /// Wrap an existing connection, using the compat codec for payloads.
    pub fn new(conn: Connection) -> Self {
        Self::with_serializer(conn, Arc::new(CompatSerializer::new()))
    }

    /// Wrap an existing connection with a custom payload codec.
    pub fn with_serializer(conn: Connection, serde: Arc<dyn Serializer>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            serde,
            is_setup: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open (or create) a database file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CheckpointError::Storage(format!("failed to open database: {e}")))?;
        Ok(Self::new(conn))
    }

    /// Create an in-memory database (useful for tests and demos).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CheckpointError::Storage(format!("failed to open in-memory db: {e}")))?;
        Ok(Self::new(conn))
    }

    /// Idempotently ensure the checkpoints table exists. Called implicitly by
    /// every operation; calling it again is a no-op.
    pub async fn setup(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let is_setup = Arc::clone(&self.is_setup);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            ensure_setup(&conn, &is_setup)
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("spawn_blocking: {e}")))?
    }
}

/// Runs the schema creation statement at most once per saver instance. The
/// caller holds the connection mutex, so a first-use race cannot execute the
/// statement twice.
fn ensure_setup(conn: &Connection, is_setup: &AtomicBool) -> Result<()> {
    if is_setup.load(Ordering::Acquire) {
        return Ok(());
    }
    tracing::debug!("creating checkpoints table");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT NOT NULL,
            checkpoint_id TEXT NOT NULL,
            parent_checkpoint_id TEXT,
            checkpoint_bytes BLOB,
            metadata_bytes BLOB,
            PRIMARY KEY (thread_id, checkpoint_id)
        );",
    )
    .map_err(|e| CheckpointError::Storage(format!("create table: {e}")))?;
    is_setup.store(true, Ordering::Release);
    Ok(())
}

struct RawRow {
    thread_id: String,
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    checkpoint_bytes: Vec<u8>,
    metadata_bytes: Option<Vec<u8>>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        thread_id: row.get(0)?,
        checkpoint_id: row.get(1)?,
        parent_checkpoint_id: row.get(2)?,
        checkpoint_bytes: row.get(3)?,
        metadata_bytes: row.get(4)?,
    })
}

fn decode_tuple(serde: &dyn Serializer, row: RawRow) -> Result<CheckpointTuple> {
    let checkpoint_value = serde.loads(&row.checkpoint_bytes)?;
    let checkpoint: Checkpoint = serde_json::from_value(checkpoint_value)
        .map_err(|e| CheckpointError::Decode(format!("checkpoint payload: {e}")))?;
    let metadata = match &row.metadata_bytes {
        Some(bytes) => {
            let metadata_value = serde.loads(bytes)?;
            serde_json::from_value(metadata_value)
                .map_err(|e| CheckpointError::Decode(format!("metadata payload: {e}")))?
        }
        None => CheckpointMetadata::default(),
    };
    let parent_config = row
        .parent_checkpoint_id
        .map(|parent| CheckpointConfig::new(&row.thread_id).with_checkpoint_id(parent));
    Ok(CheckpointTuple {
        config: CheckpointConfig::new(row.thread_id).with_checkpoint_id(row.checkpoint_id),
        checkpoint,
        metadata,
        parent_config,
    })
}

#[async_trait]
impl CheckpointSaver for SqliteSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        config.validate()?;
        let conn = Arc::clone(&self.conn);
        let serde = Arc::clone(&self.serde);
        let is_setup = Arc::clone(&self.is_setup);
        let thread_id = config.thread_id.clone();
        let checkpoint_id = config.checkpoint_id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            ensure_setup(&conn, &is_setup)?;
            let raw = match &checkpoint_id {
                Some(id) => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT {SELECT_COLUMNS} FROM checkpoints \
                             WHERE thread_id = ? AND checkpoint_id = ?"
                        ))
                        .map_err(|e| CheckpointError::Storage(format!("prepare: {e}")))?;
                    stmt.query_row(params![thread_id, id], read_row)
                        .optional()
                        .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT {SELECT_COLUMNS} FROM checkpoints \
                             WHERE thread_id = ? ORDER BY checkpoint_id DESC LIMIT 1"
                        ))
                        .map_err(|e| CheckpointError::Storage(format!("prepare: {e}")))?;
                    stmt.query_row(params![thread_id], read_row)
                        .optional()
                        .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?
                }
            };
            raw.map(|row| decode_tuple(serde.as_ref(), row)).transpose()
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("spawn_blocking: {e}")))?
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        config.validate()?;
        let before_id = before.map(|b| b.before_id().map(str::to_owned)).transpose()?;
        let limit = limit.filter(|&n| n > 0);
        let conn = Arc::clone(&self.conn);
        let serde = Arc::clone(&self.serde);
        let is_setup = Arc::clone(&self.is_setup);
        let thread_id = config.thread_id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            ensure_setup(&conn, &is_setup)?;

            let mut query = format!("SELECT {SELECT_COLUMNS} FROM checkpoints WHERE thread_id = ?");
            let mut sql_params = vec![SqlValue::Text(thread_id)];
            if let Some(bound) = before_id {
                query.push_str(" AND checkpoint_id < ?");
                sql_params.push(SqlValue::Text(bound));
            }
            query.push_str(" ORDER BY checkpoint_id DESC");
            if let Some(n) = limit {
                query.push_str(" LIMIT ?");
                sql_params.push(SqlValue::Integer(n as i64));
            }

            let mut stmt = conn
                .prepare(&query)
                .map_err(|e| CheckpointError::Storage(format!("prepare: {e}")))?;
            let rows = stmt
                .query_map(params_from_iter(sql_params), read_row)
                .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?;

            let mut tuples = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| CheckpointError::Storage(format!("read row: {e}")))?;
                // A decode failure on any row aborts the whole call.
                tuples.push(decode_tuple(serde.as_ref(), raw)?);
            }
            Ok(tuples)
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("spawn_blocking: {e}")))?
    }

    async fn search(
        &self,
        filter: &MetadataFilter,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let (where_clause, params) = search_where(filter, before)?;
        let limit = limit.filter(|&n| n > 0);
        let conn = Arc::clone(&self.conn);
        let serde = Arc::clone(&self.serde);
        let is_setup = Arc::clone(&self.is_setup);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            ensure_setup(&conn, &is_setup)?;

            let mut query = format!(
                "SELECT {SELECT_COLUMNS} FROM checkpoints {where_clause}ORDER BY checkpoint_id DESC"
            );
            let mut sql_params = params;
            if let Some(n) = limit {
                query.push_str(" LIMIT ?");
                sql_params.push(SqlValue::Integer(n as i64));
            }

            let mut stmt = conn
                .prepare(&query)
                .map_err(|e| CheckpointError::Storage(format!("prepare: {e}")))?;
            let rows = stmt
                .query_map(params_from_iter(sql_params), read_row)
                .map_err(|e| CheckpointError::Storage(format!("query: {e}")))?;

            let mut tuples = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| CheckpointError::Storage(format!("read row: {e}")))?;
                tuples.push(decode_tuple(serde.as_ref(), raw)?);
            }
            Ok(tuples)
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("spawn_blocking: {e}")))?
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
        let metadata_value = serde_json::to_value(&metadata)
            .map_err(|e| CheckpointError::Decode(format!("encode metadata: {e}")))?;
        let checkpoint_bytes = self.serde.dumps(&checkpoint_value)?;
        let metadata_bytes = self.serde.dumps(&metadata_value)?;

        let conn = Arc::clone(&self.conn);
        let is_setup = Arc::clone(&self.is_setup);
        let thread_id = config.thread_id.clone();
        let parent_checkpoint_id = config.checkpoint_id.clone();
        let checkpoint_id = checkpoint.id;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            ensure_setup(&conn, &is_setup)?;
            tracing::debug!(%thread_id, %checkpoint_id, "saving checkpoint");
            conn.execute(
                "INSERT OR REPLACE INTO checkpoints \
                 (thread_id, checkpoint_id, parent_checkpoint_id, checkpoint_bytes, metadata_bytes) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    thread_id,
                    checkpoint_id,
                    parent_checkpoint_id,
                    checkpoint_bytes,
                    metadata_bytes,
                ],
            )
            .map_err(|e| CheckpointError::Storage(format!("insert checkpoint: {e}")))?;
            Ok(CheckpointConfig::new(thread_id).with_checkpoint_id(checkpoint_id))
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("spawn_blocking: {e}")))?
    }
}
