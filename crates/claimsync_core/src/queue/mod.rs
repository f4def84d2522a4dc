//! Bounded read view over pending records.
//!
//! # Responsibility
//! - Pull the oldest pending records from the store in batches.
//!
//! # Invariants
//! - A batch never exceeds `max_batch` records.
//! - Records within a batch are in ascending id order.

use crate::model::record::Record;
use crate::repo::record_repo::{RecordStore, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum QueueError {
    /// `max_batch` must be at least one.
    InvalidBatchSize(u32),
    Store(RepoError),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBatchSize(value) => {
                write!(f, "queue batch size must be at least 1, got {value}")
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidBatchSize(_) => None,
        }
    }
}

impl From<RepoError> for QueueError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Read-only, batch-bounded view of the pending queue.
pub struct QueueReader<'store, S: RecordStore + ?Sized> {
    store: &'store S,
    max_batch: u32,
}

impl<'store, S: RecordStore + ?Sized> QueueReader<'store, S> {
    pub fn new(store: &'store S, max_batch: u32) -> Result<Self, QueueError> {
        if max_batch == 0 {
            return Err(QueueError::InvalidBatchSize(max_batch));
        }
        Ok(Self { store, max_batch })
    }

    pub fn max_batch(&self) -> u32 {
        self.max_batch
    }

    /// Returns up to `max_batch` oldest pending records.
    pub fn next_batch(&self) -> Result<Vec<Record>, QueueError> {
        Ok(self.store.list_pending(Some(self.max_batch))?)
    }

    /// Returns up to `max_batch` oldest pending records for one destination.
    pub fn next_batch_for(&self, destination: &str) -> Result<Vec<Record>, QueueError> {
        Ok(self
            .store
            .list_pending_for(destination, Some(self.max_batch))?)
    }
}
