//! Session folder and metadata.

use super::{StoreError, StoreResult, io_error, write_json_atomic};
use crate::{MAX_TABLES, TableId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub const SESSION_CONFIG_FILE: &str = "session_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_end: Option<DateTime<Utc>>,
    pub tables_active: Vec<TableId>,
    pub max_tables: usize,

    /// Snapshot of the global settings in effect
    pub settings: serde_json::Value,
}

/// A running session: one folder holding every table's files.
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
    record: SessionRecord,
}

impl Session {
    /// Create a new timestamped session folder under `root` and write its metadata.
    pub fn create<S: Serialize>(root: &Path, settings: &S, tables: &[TableId]) -> StoreResult<Self> {
        let start = Utc::now();
        fs::create_dir_all(root).map_err(io_error(root))?;

        let base = start.format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut dir = root.join(&base);
        let mut suffix = 1;
        loop {
            match fs::create_dir(&dir) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    suffix += 1;
                    dir = root.join(format!("{base}_{suffix}"));
                }
                Err(e) => return Err(io_error(&dir)(e)),
            }
        }

        let session = Self {
            dir,
            record: SessionRecord {
                session_id: Uuid::new_v4(),
                session_start: start,
                session_end: None,
                tables_active: tables.to_vec(),
                max_tables: MAX_TABLES,
                settings: serde_json::to_value(settings)?,
            },
        };
        session.write()?;
        log::info!(
            "Session {} started in {}",
            session.record.session_id,
            session.dir.display()
        );
        Ok(session)
    }

    /// Re-open an existing session folder
    pub fn resume(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(SESSION_CONFIG_FILE);
        let bytes = fs::read(&path).map_err(io_error(&path))?;
        let mut record: SessionRecord = serde_json::from_slice(&bytes)?;
        record.session_end = None;
        let session = Self {
            dir: dir.to_path_buf(),
            record,
        };
        session.write()?;
        Ok(session)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Stamp the end time and write the metadata one last time
    pub fn close(&mut self) -> StoreResult<()> {
        self.record.session_end = Some(Utc::now());
        self.write()?;
        log::info!("Session {} closed", self.record.session_id);
        Ok(())
    }

    fn write(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.dir.join(SESSION_CONFIG_FILE), &self.record)
    }
}
