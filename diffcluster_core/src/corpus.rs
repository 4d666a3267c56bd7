use crate::case::FuzzCaseId;
use crate::counters::ExecutionCounter;
use log::warn;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can arise while collecting counters into a corpus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorpusError {
    /// Two records claim the same hash but carry different counts.
    #[error("Counter hash {0} is already used by a counter with different counts")]
    HashConflict(String),

    /// The requested entry does not exist.
    #[error("Counter ID {0} not found in corpus")]
    EntryNotFound(usize),
}

/// A counter together with every fuzz case that produced exactly this coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub counter: ExecutionCounter,
    pub inputs: Vec<FuzzCaseId>,
}

impl CorpusEntry {
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Leaf label used when presenting dendrograms: `"{input_count} - {hash}"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.input_count(), self.counter.hash())
    }
}

/// In-memory collection of distinct counters, keyed by content hash and kept
/// in insertion order.
///
/// Entry IDs are insertion indices and stay valid until [`CounterCorpus::truncate`].
#[derive(Debug, Default, Clone)]
pub struct CounterCorpus {
    entries: Vec<CorpusEntry>,
    by_hash: HashMap<String, usize>,
}

impl CounterCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `counter` with the cases that produced it.
    ///
    /// A counter whose hash is already known extends the existing entry's
    /// inputs instead of creating a new entry. Returns the entry ID.
    pub fn add(
        &mut self,
        counter: ExecutionCounter,
        inputs: impl IntoIterator<Item = FuzzCaseId>,
    ) -> Result<usize, CorpusError> {
        if let Some(&id) = self.by_hash.get(counter.hash()) {
            let entry = &mut self.entries[id];
            if entry.counter.counts() != counter.counts() {
                return Err(CorpusError::HashConflict(counter.hash().to_string()));
            }
            entry.inputs.extend(inputs);
            return Ok(id);
        }
        let id = self.entries.len();
        self.by_hash.insert(counter.hash().to_string(), id);
        self.entries.push(CorpusEntry {
            counter,
            inputs: inputs.into_iter().collect(),
        });
        Ok(id)
    }

    pub fn get(&self, id: usize) -> Result<&CorpusEntry, CorpusError> {
        self.entries.get(id).ok_or(CorpusError::EntryNotFound(id))
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<&CorpusEntry> {
        self.by_hash.get(hash).map(|&id| &self.entries[id])
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn counters(&self) -> Vec<ExecutionCounter> {
        self.entries.iter().map(|e| e.counter.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keeps only the first `max` entries.
    pub fn truncate(&mut self, max: usize) {
        if self.entries.len() <= max {
            return;
        }
        warn!(
            "Limiting corpus from {} to the first {} counters",
            self.entries.len(),
            max
        );
        self.entries.truncate(max);
        self.by_hash.retain(|_, id| *id < max);
    }
}
