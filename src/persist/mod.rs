//! JSON state files under `<project>/.ctxbudget/`
//!
//! Every store follows the same contract:
//! - Reads never fail. A missing, empty, or corrupted file loads as the
//!   default state, and records are copied field by field from an
//!   allow-list of known keys.
//! - Writes go to a uniquely named temp file in the same directory and are
//!   renamed over the target, so readers never observe a partial file.
//! - Stores with append-only logs re-read the file before writing and merge
//!   entries by id. There are no locks.

mod budget_file;
pub mod fields;
mod phase;
mod tracker;

pub use budget_file::{BudgetStore, BUDGET_FILE_NAME};
pub use phase::{PhaseState, PhaseTransition, PHASE_FILE_NAME, PHASE_TRANSITION_LIMIT};
pub use tracker::{ToolCall, ToolCallTracker, TOOL_CALL_LIMIT, TRACKER_FILE_NAME};

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Directory under the project root holding all state files
pub const STATE_DIR: &str = ".ctxbudget";

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A value that can live in a JSON state file
pub trait PersistedState: Serialize + Default + Clone {
    /// File name inside the state directory
    const FILE_NAME: &'static str;

    /// Whether `save` folds the on-disk copy in before writing
    const MERGES_ON_SAVE: bool = false;

    /// Build a state from an untrusted JSON object. Unknown keys are
    /// ignored; missing or ill-typed fields keep their default.
    fn from_json(obj: &Map<String, Value>) -> Self;

    /// Fold a state read back from disk into `self`. `self` wins on
    /// scalar fields and on entry-id clashes.
    fn merge_from(&mut self, _on_disk: Self) {}
}

/// An entry of an append-only log that can be merged across writers
pub trait LogEntry {
    fn entry_id(&self) -> &str;
    fn recorded_at(&self) -> DateTime<Utc>;
}

/// Union two logs by id, newest first, at most `cap` entries.
///
/// Entries in `ours` replace disk entries carrying the same id.
pub fn merge_entries<T: LogEntry>(ours: Vec<T>, theirs: Vec<T>, cap: usize) -> Vec<T> {
    let mut seen: HashSet<String> = ours.iter().map(|e| e.entry_id().to_string()).collect();
    let mut merged = ours;
    for entry in theirs {
        if seen.insert(entry.entry_id().to_string()) {
            merged.push(entry);
        }
    }
    // Stable: entries stamped in the same millisecond keep their order
    merged.sort_by(|a, b| b.recorded_at().cmp(&a.recorded_at()));
    merged.truncate(cap);
    merged
}

/// File-backed store for one state type
#[derive(Debug, Clone)]
pub struct JsonStateStore<S> {
    root: PathBuf,
    _state: PhantomData<fn() -> S>,
}

impl<S: PersistedState> JsonStateStore<S> {
    /// Create a store for the project at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _state: PhantomData,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn path(&self) -> PathBuf {
        self.state_dir().join(S::FILE_NAME)
    }

    /// Load the state, falling back to the default on any problem
    pub fn load(&self) -> S {
        match read_object(&self.path()) {
            Some(obj) => S::from_json(&obj),
            None => S::default(),
        }
    }

    /// Write the state, returning `false` when the write failed
    pub fn save(&self, state: &S) -> bool {
        match self.try_save(state) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save {}: {}", self.path().display(), e);
                false
            }
        }
    }

    /// Write the state, merging with the file first when the type asks for it
    pub fn try_save(&self, state: &S) -> Result<()> {
        let path = self.path();
        let bytes = if S::MERGES_ON_SAVE {
            let mut merged = state.clone();
            if let Some(obj) = read_object(&path) {
                merged.merge_from(S::from_json(&obj));
            }
            serde_json::to_vec_pretty(&merged)?
        } else {
            serde_json::to_vec_pretty(state)?
        };
        atomic_write(&path, &bytes)
    }

    /// Overwrite with a fresh default and return it
    pub fn clear(&self) -> S {
        let fresh = S::default();
        let written = serde_json::to_vec_pretty(&fresh)
            .map_err(Error::from)
            .and_then(|bytes| atomic_write(&self.path(), &bytes));
        if let Err(e) = written {
            warn!("Failed to clear {}: {}", self.path().display(), e);
        }
        fresh
    }
}

/// Read a JSON object from `path`, or `None` if there is nothing usable
fn read_object(path: &Path) -> Option<Map<String, Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    if text.trim().is_empty() {
        debug!("{} is empty, using defaults", path.display());
        return None;
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(obj)) => Some(obj),
        Ok(_) => {
            warn!("{} does not hold a JSON object, using defaults", path.display());
            None
        }
        Err(e) => {
            warn!("{} is corrupted ({}), using defaults", path.display(), e);
            None
        }
    }
}

/// Replace `path` with `bytes` via temp file + rename
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Persist(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| io_error("create", dir, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    let result = write_then_rename(&tmp, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp).map_err(|e| io_error("create", tmp, e))?;
    file.write_all(bytes).map_err(|e| io_error("write", tmp, e))?;
    file.flush().map_err(|e| io_error("flush", tmp, e))?;
    let _ = file.sync_all();
    drop(file);

    fs::rename(tmp, path).map_err(|e| io_error("replace", path, e))?;
    Ok(())
}

fn io_error(action: &str, path: &Path, e: io::Error) -> Error {
    Error::Persist(format!("{} {}: {}", action, path.display(), e))
}
