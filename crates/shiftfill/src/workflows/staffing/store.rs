use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, error, warn};

use super::domain::{AssignmentId, ShiftId};
use super::error::MarketplaceError;
use super::ports::{RepositoryError, ShiftRepository};
use super::record::ShiftRecord;

/// Optimistic transaction primitive over shift records.
///
/// Every mutation of a shift, its competitors, or its assignment goes through
/// [`ShiftStore::transact`]: read a versioned record, apply the change to a copy, check
/// invariants, and write conditioned on the version read. Conflicting writers retry up to the
/// configured limit and then fail with `TransientContention`.
pub struct ShiftStore {
    repository: Arc<dyn ShiftRepository>,
    retry_limit: u32,
}

impl ShiftStore {
    pub fn new(repository: Arc<dyn ShiftRepository>, retry_limit: u32) -> Self {
        Self {
            repository,
            retry_limit: retry_limit.max(1),
        }
    }

    pub fn insert(&self, record: ShiftRecord) -> Result<(), MarketplaceError> {
        record.check_invariants()?;
        self.repository.insert(record)?;
        Ok(())
    }

    pub fn load(&self, shift_id: &ShiftId) -> Result<ShiftRecord, MarketplaceError> {
        self.repository
            .fetch(shift_id)?
            .map(|versioned| versioned.value)
            .ok_or_else(|| MarketplaceError::not_found(format!("shift {shift_id}")))
    }

    pub fn shift_for_assignment(
        &self,
        assignment_id: &AssignmentId,
    ) -> Result<ShiftId, MarketplaceError> {
        self.repository
            .shift_for_assignment(assignment_id)?
            .ok_or_else(|| MarketplaceError::not_found(format!("assignment {assignment_id}")))
    }

    pub fn active_shift_ids(&self) -> Result<Vec<ShiftId>, MarketplaceError> {
        Ok(self.repository.active_shift_ids()?)
    }

    /// Runs `apply` against the latest record and commits the result atomically.
    ///
    /// `apply` may run several times and must derive its changes from the record it is given.
    /// When it returns an error nothing is written; when it leaves the record unchanged the
    /// write is skipped.
    pub fn transact<T>(
        &self,
        shift_id: &ShiftId,
        mut apply: impl FnMut(&mut ShiftRecord) -> Result<T, MarketplaceError>,
    ) -> Result<T, MarketplaceError> {
        for attempt in 1..=self.retry_limit {
            let current = self
                .repository
                .fetch(shift_id)?
                .ok_or_else(|| MarketplaceError::not_found(format!("shift {shift_id}")))?;

            let mut working = current.value.clone();
            let outcome = apply(&mut working)?;

            if working == current.value {
                return Ok(outcome);
            }

            if let Err(violation) = working.check_invariants() {
                error!(%shift_id, %violation, "refusing to commit shift record");
                return Err(violation);
            }

            match self.repository.compare_and_swap(working, current.version) {
                Ok(version) => {
                    debug!(%shift_id, version, attempt, "shift record committed");
                    return Ok(outcome);
                }
                Err(RepositoryError::VersionMismatch { expected, found }) => {
                    debug!(%shift_id, expected, found, attempt, "write conflict; retrying");
                    backoff(attempt);
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(%shift_id, attempts = self.retry_limit, "retry budget exhausted");
        Err(MarketplaceError::TransientContention {
            shift_id: shift_id.clone(),
            attempts: self.retry_limit,
        })
    }
}

fn backoff(attempt: u32) {
    if attempt <= 2 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(StdDuration::from_micros(50 * u64::from(attempt)));
    }
}
