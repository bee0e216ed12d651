//! Per-class load records.
//!
//! The loader keeps one [`LoadedClassRecord`] per class name for the life of
//! the process. The table guarantees that the plan for a class is executed at
//! most once, and it is how re-definition attempts are spotted: a class name
//! presented again with different original bytes is rejected.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::error::LoadError;

/// What the loader did with one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClassRecord {
    pub class: String,
    /// Bytes received from the runtime
    pub original: Arc<[u8]>,
    /// Bytes handed back to the runtime
    pub output: Arc<[u8]>,
    /// Number of steps in the plan
    pub plan_len: usize,
    /// How many times the plan was executed: 0 for an empty plan, else 1
    pub applications: u32,
}

impl LoadedClassRecord {
    pub fn is_transformed(&self) -> bool {
        self.applications > 0
    }

    /// Rejects a second presentation of the class with different bytes.
    pub fn check_original(&self, bytes: &[u8]) -> Result<(), LoadError> {
        if *self.original == *bytes {
            Ok(())
        } else {
            Err(LoadError::Redefinition {
                class: self.class.clone(),
            })
        }
    }
}

type RecordSlot = Arc<OnceCell<Result<Arc<LoadedClassRecord>, LoadError>>>;

/// Concurrent table of records keyed by class name.
#[derive(Default)]
pub struct RecordTable {
    slots: DashMap<String, RecordSlot>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `class`, running `compute` if there is none.
    ///
    /// Concurrent callers for the same class wait for a single `compute`
    /// and share its result. Failures are stored as well.
    pub fn get_or_compute<F>(&self, class: &str, compute: F) -> Result<Arc<LoadedClassRecord>, LoadError>
    where
        F: FnOnce() -> Result<LoadedClassRecord, LoadError>,
    {
        let slot = self
            .slots
            .entry(class.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        slot.get_or_init(|| compute().map(Arc::new)).clone()
    }

    /// The finished record for `class`, if it was loaded successfully.
    pub fn get(&self, class: &str) -> Option<Arc<LoadedClassRecord>> {
        let slot = self.slots.get(class)?.clone();
        slot.get().and_then(|result| result.as_ref().ok().cloned())
    }

    /// Every successful record, sorted by class name.
    pub fn records(&self) -> Vec<Arc<LoadedClassRecord>> {
        let mut records: Vec<_> = self
            .slots
            .iter()
            .filter_map(|entry| entry.value().get().and_then(|r| r.as_ref().ok().cloned()))
            .collect();
        records.sort_by(|a, b| a.class.cmp(&b.class));
        records
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
