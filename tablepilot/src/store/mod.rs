//! Durable storage for a session.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/YYYY-MM-DD_HH-MM-SS/
//!     session_config.json      session metadata, rewritten at start and clean shutdown
//!     table_<id>.jsonl         one JSON round per line, append-only
//!     table_<id>_state.json    flushed table record, replaced atomically
//! ```
//!
//! Every write takes an exclusive lock on the file it touches, writes, syncs,
//! then releases the lock. Tables never share a file.

pub mod cache;
pub mod session;
pub mod table_store;

pub use cache::{PersistenceCache, TableRecord};
pub use session::{Session, SessionRecord};
pub use table_store::{Recovered, TableStore};

use crate::TableId;
use fs2::FileExt;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Table {table_id}: round {got} out of order (expected {expected})")]
    OutOfOrder {
        table_id: TableId,
        expected: u64,
        got: u64,
    },

    #[error("Table {0} has no open store")]
    UnknownTable(TableId),

    #[error("Table {0} store lock poisoned")]
    Poisoned(TableId),

    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Replace `path` with the JSON form of `value`: write a sibling temp file
/// under an exclusive lock, sync it, then rename over the target.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;

    let mut file = File::create(&tmp).map_err(io_error(&tmp))?;
    FileExt::lock_exclusive(&file).map_err(io_error(&tmp))?;
    let written = file
        .write_all(&bytes)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all());
    let unlocked = FileExt::unlock(&file);
    written.map_err(io_error(&tmp))?;
    unlocked.map_err(io_error(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_error(path))
}
