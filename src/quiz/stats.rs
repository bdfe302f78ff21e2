use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// The statistics backend could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("statistics storage unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("statistics storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// How many times each option was picked, per question, across all users.
///
/// Serializes as `{"<question>": {"<option>": count}}`. Questions nobody
/// has answered yet have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StatsTable {
    questions: BTreeMap<usize, BTreeMap<usize, u64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// One entry per displayed option, in display order.
    pub percentages: Vec<f64>,
    pub total_attempts: u64,
}

impl StatsTable {
    pub fn record(&mut self, question_id: usize, option_id: usize) {
        *self
            .questions
            .entry(question_id)
            .or_default()
            .entry(option_id)
            .or_default() += 1;
    }

    pub fn count(&self, question_id: usize, option_id: usize) -> u64 {
        self.questions
            .get(&question_id)
            .and_then(|options| options.get(&option_id))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over every recorded option of the question, including options that
    /// are no longer part of the bank.
    pub fn total_attempts(&self, question_id: usize) -> u64 {
        self.questions
            .get(&question_id)
            .map(|options| options.values().sum())
            .unwrap_or(0)
    }

    pub fn summarize(&self, question_id: usize, option_texts: &[String]) -> Summary {
        let total_attempts = self.total_attempts(question_id);
        let percentages = (0..option_texts.len())
            .map(|option_id| {
                if total_attempts == 0 {
                    return 0.0;
                }
                100.0 * self.count(question_id, option_id) as f64 / total_attempts as f64
            })
            .collect();

        Summary {
            percentages,
            total_attempts,
        }
    }
}

/// Durable home of the statistics table. Reads and writes always cover the
/// whole table.
pub trait StatsStore {
    fn load(&self) -> Result<StatsTable, StorageError>;
    fn persist(&mut self, table: &StatsTable) -> Result<(), StorageError>;
}

/// Statistics kept in a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStats {
    path: PathBuf,
}

impl JsonFileStats {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatsStore for JsonFileStats {
    fn load(&self) -> Result<StatsTable, StorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StatsTable::default()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn persist(&mut self, table: &StatsTable) -> Result<(), StorageError> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer(&mut writer, table)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    table: StatsTable,
}

#[cfg(test)]
impl StatsStore for MemoryStats {
    fn load(&self) -> Result<StatsTable, StorageError> {
        Ok(self.table.clone())
    }

    fn persist(&mut self, table: &StatsTable) -> Result<(), StorageError> {
        self.table = table.clone();
        Ok(())
    }
}

/// Serializes every read-modify-write of the shared table behind one lock.
#[derive(Debug, Default)]
pub struct Statistics<S> {
    store: Mutex<S>,
}

impl<S: StatsStore> Statistics<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Counts one pick and returns the table as persisted, including it.
    pub fn record_answer(
        &self,
        question_id: usize,
        option_id: usize,
    ) -> Result<StatsTable, StorageError> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = store.load()?;
        table.record(question_id, option_id);
        store.persist(&table)?;
        Ok(table)
    }

    pub fn snapshot(&self) -> Result<StatsTable, StorageError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .load()
    }
}
