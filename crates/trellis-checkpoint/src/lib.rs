pub mod config;
pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod saver;
pub mod search;
pub mod serializer;
pub mod sqlite;
pub mod types;

pub mod prelude {
    pub use crate::config::CheckpointConfig;
    pub use crate::error::{CheckpointError, Result};
    pub use crate::memory::MemorySaver;
    pub use crate::saver::CheckpointSaver;
    pub use crate::serializer::{CompatSerializer, JsonSerializer, Serializer};
    pub use crate::sqlite::SqliteSaver;
    pub use crate::types::{
        Checkpoint, CheckpointMetadata, CheckpointTuple, MetadataFilter,
    };
}
