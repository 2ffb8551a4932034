//! In-memory snapshot of one book's rating ledger, oldest entry first.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::DifficultyRating;

#[derive(Debug, Clone, Default)]
pub struct RatingLedger {
    entries: VecDeque<DifficultyRating>,
}

impl RatingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from rows in any order; entries are sorted by `seq`.
    pub fn from_records(mut records: Vec<DifficultyRating>) -> Self {
        records.sort_by_key(|record| record.seq);
        Self {
            entries: records.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, child_id: Uuid) -> bool {
        self.entries.iter().any(|entry| entry.child_id == child_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DifficultyRating> {
        self.entries.iter()
    }

    /// Appends a rating; a second rating from the same child is rejected.
    pub fn append(&mut self, record: DifficultyRating) -> Result<()> {
        if self.contains(record.child_id) {
            return Err(EngineError::DuplicateRating {
                book_id: record.book_id,
                child_id: record.child_id,
            });
        }
        self.entries.push_back(record);
        Ok(())
    }

    /// Removes the oldest `count` entries and returns them.
    pub fn discard_oldest(&mut self, count: usize) -> Vec<DifficultyRating> {
        let count = count.min(self.entries.len());
        self.entries.drain(..count).collect()
    }
}
