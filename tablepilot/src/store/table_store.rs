//! Append-only round file for one table.

use super::{StoreError, StoreResult, io_error, write_json_atomic};
use crate::{TableId, round::RoundOutcome};
use fs2::FileExt;
use serde::Serialize;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Rounds read back when a store is opened
#[derive(Debug, Clone, Default)]
pub struct Recovered {
    pub rounds: Vec<RoundOutcome>,

    /// Lines that could not be parsed (a torn final write, usually)
    pub skipped_lines: usize,
}

#[derive(Debug)]
pub struct TableStore {
    table_id: TableId,
    rounds_path: PathBuf,
    state_path: PathBuf,
    last_round: Option<u64>,
}

impl TableStore {
    pub fn rounds_file_name(table_id: TableId) -> String {
        format!("table_{table_id}.jsonl")
    }

    pub fn state_file_name(table_id: TableId) -> String {
        format!("table_{table_id}_state.json")
    }

    /// Open the table's files in `dir`, reading back any rounds already written.
    pub fn open(dir: &Path, table_id: TableId) -> StoreResult<(Self, Recovered)> {
        let rounds_path = dir.join(Self::rounds_file_name(table_id));
        let state_path = dir.join(Self::state_file_name(table_id));

        let bytes = match fs::read(&rounds_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(&rounds_path)(e)),
        };

        let mut recovered = Recovered::default();
        for line in bytes.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<RoundOutcome>(line) {
                Ok(round) => recovered.rounds.push(round),
                Err(e) => {
                    log::warn!(
                        "Table {}: Skipping unreadable line in {}: {}",
                        table_id,
                        rounds_path.display(),
                        e
                    );
                    recovered.skipped_lines += 1;
                }
            }
        }

        let store = Self {
            table_id,
            last_round: recovered.rounds.iter().map(|r| r.round_number).max(),
            rounds_path,
            state_path,
        };

        Ok((store, recovered))
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn rounds_path(&self) -> &Path {
        &self.rounds_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn last_round(&self) -> Option<u64> {
        self.last_round
    }

    /// Append one round. The file is locked for the duration of the write and
    /// synced before the lock is released.
    ///
    /// A torn line already at the end of the file is closed off first, and a
    /// write that fails part way is cut back to the previous length, so a
    /// retried round always lands on a line of its own.
    ///
    /// # Errors
    ///
    /// [`StoreError::OutOfOrder`] unless the round number is exactly one past
    /// the last persisted round (or 1 for an empty file).
    pub fn append(&mut self, outcome: &RoundOutcome) -> StoreResult<()> {
        let expected = self.last_round.map_or(1, |n| n + 1);
        if outcome.round_number != expected {
            return Err(StoreError::OutOfOrder {
                table_id: self.table_id,
                expected,
                got: outcome.round_number,
            });
        }

        let mut line = Vec::with_capacity(256);
        serde_json::to_writer(&mut line, outcome)?;
        line.push(b'\n');

        let path = &self.rounds_path;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(io_error(path))?;
        FileExt::lock_exclusive(&file).map_err(io_error(path))?;
        let written = append_line(&mut file, &line);
        let unlocked = FileExt::unlock(&file);
        written.map_err(io_error(path))?;
        unlocked.map_err(io_error(path))?;

        self.last_round = Some(outcome.round_number);
        Ok(())
    }

    /// Replace the table's state snapshot file
    pub fn write_state<T: Serialize>(&self, state: &T) -> StoreResult<()> {
        write_json_atomic(&self.state_path, state)
    }
}

/// Write `line` at the end of a locked rounds file
fn append_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    let len = file.metadata()?.len();
    let mut pending = Vec::with_capacity(line.len() + 1);
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            pending.push(b'\n');
        }
    }
    pending.extend_from_slice(line);

    let written = file
        .write_all(&pending)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_data());
    if let Err(e) = written {
        if let Err(undo) = file.set_len(len) {
            log::error!("Cannot cut back partial round write: {}", undo);
        }
        return Err(e);
    }
    Ok(())
}
