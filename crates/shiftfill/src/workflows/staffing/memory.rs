//! In-process implementations of the storage and directory ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::domain::{AssignmentId, PaymentId, ShiftId, WorkerId};
use super::escrow::{PaymentStatus, ShiftPayment};
use super::matching::WorkerProfile;
use super::ports::{
    PaymentRepository, RepositoryError, ShiftRepository, StandingRepository, Versioned,
    WorkerDirectory,
};
use super::record::ShiftRecord;
use super::reliability::WorkerStanding;

fn poisoned(what: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("{what} lock poisoned"))
}

type ShiftSlot = Arc<Mutex<Versioned<ShiftRecord>>>;

/// Shift records keyed by id. Each record sits behind its own mutex so conditional writes on
/// different shifts never contend.
#[derive(Default)]
pub struct InMemoryShiftRepository {
    shifts: RwLock<HashMap<ShiftId, ShiftSlot>>,
    assignments: RwLock<HashMap<AssignmentId, ShiftId>>,
}

impl InMemoryShiftRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &ShiftId) -> Result<Option<ShiftSlot>, RepositoryError> {
        let shifts = self.shifts.read().map_err(|_| poisoned("shift map"))?;
        Ok(shifts.get(id).cloned())
    }

    fn index_assignments(&self, record: &ShiftRecord) -> Result<(), RepositoryError> {
        let mut index = self
            .assignments
            .write()
            .map_err(|_| poisoned("assignment index"))?;
        for assignment in &record.assignments {
            index
                .entry(assignment.id.clone())
                .or_insert_with(|| record.shift.id.clone());
        }
        Ok(())
    }
}

impl ShiftRepository for InMemoryShiftRepository {
    fn insert(&self, record: ShiftRecord) -> Result<(), RepositoryError> {
        self.index_assignments(&record)?;
        let mut shifts = self.shifts.write().map_err(|_| poisoned("shift map"))?;
        if shifts.contains_key(&record.shift.id) {
            return Err(RepositoryError::Conflict);
        }
        shifts.insert(
            record.shift.id.clone(),
            Arc::new(Mutex::new(Versioned {
                version: 1,
                value: record,
            })),
        );
        Ok(())
    }

    fn fetch(&self, id: &ShiftId) -> Result<Option<Versioned<ShiftRecord>>, RepositoryError> {
        match self.slot(id)? {
            Some(slot) => {
                let stored = slot.lock().map_err(|_| poisoned("shift record"))?;
                Ok(Some(stored.clone()))
            }
            None => Ok(None),
        }
    }

    fn compare_and_swap(
        &self,
        record: ShiftRecord,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let slot = self.slot(&record.shift.id)?.ok_or(RepositoryError::NotFound)?;
        let mut stored = slot.lock().map_err(|_| poisoned("shift record"))?;
        if stored.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
                found: stored.version,
            });
        }
        self.index_assignments(&record)?;
        stored.version += 1;
        stored.value = record;
        Ok(stored.version)
    }

    fn shift_for_assignment(&self, id: &AssignmentId) -> Result<Option<ShiftId>, RepositoryError> {
        let index = self
            .assignments
            .read()
            .map_err(|_| poisoned("assignment index"))?;
        Ok(index.get(id).cloned())
    }

    fn active_shift_ids(&self) -> Result<Vec<ShiftId>, RepositoryError> {
        let slots: Vec<(ShiftId, ShiftSlot)> = {
            let shifts = self.shifts.read().map_err(|_| poisoned("shift map"))?;
            shifts
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut active = Vec::new();
        for (id, slot) in slots {
            let stored = slot.lock().map_err(|_| poisoned("shift record"))?;
            let record = &stored.value;
            if !record.shift.status.is_terminal()
                || record.has_open_competitors()
                || record.has_pending_feedback()
            {
                active.push(id);
            }
        }
        active.sort();
        Ok(active)
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: Mutex<HashMap<PaymentId, ShiftPayment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PaymentRepository for InMemoryPaymentRepository {
    fn insert(&self, payment: ShiftPayment) -> Result<(), RepositoryError> {
        let mut payments = self.payments.lock().map_err(|_| poisoned("payment"))?;
        let duplicate = payments.contains_key(&payment.id)
            || payments
                .values()
                .any(|existing| existing.assignment_id == payment.assignment_id);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    fn update(&self, payment: ShiftPayment) -> Result<(), RepositoryError> {
        let mut payments = self.payments.lock().map_err(|_| poisoned("payment"))?;
        match payments.get_mut(&payment.id) {
            Some(existing) => {
                *existing = payment;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &PaymentId) -> Result<Option<ShiftPayment>, RepositoryError> {
        let payments = self.payments.lock().map_err(|_| poisoned("payment"))?;
        Ok(payments.get(id).cloned())
    }

    fn for_assignment(&self, id: &AssignmentId) -> Result<Option<ShiftPayment>, RepositoryError> {
        let payments = self.payments.lock().map_err(|_| poisoned("payment"))?;
        Ok(payments
            .values()
            .find(|payment| &payment.assignment_id == id)
            .cloned())
    }

    fn releasable(&self, at: DateTime<Utc>) -> Result<Vec<PaymentId>, RepositoryError> {
        let payments = self.payments.lock().map_err(|_| poisoned("payment"))?;
        let mut due: Vec<PaymentId> = payments
            .values()
            .filter(|payment| payment.status == PaymentStatus::InEscrow)
            .filter(|payment| payment.release_after.map(|t| t <= at).unwrap_or(false))
            .map(|payment| payment.id.clone())
            .collect();
        due.sort();
        Ok(due)
    }
}

#[derive(Default)]
pub struct InMemoryStandingRepository {
    standings: Mutex<HashMap<WorkerId, WorkerStanding>>,
}

impl InMemoryStandingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StandingRepository for InMemoryStandingRepository {
    fn fetch(&self, worker_id: &WorkerId) -> Result<Option<WorkerStanding>, RepositoryError> {
        let standings = self.standings.lock().map_err(|_| poisoned("standing"))?;
        Ok(standings.get(worker_id).cloned())
    }

    fn upsert(&self, standing: WorkerStanding) -> Result<(), RepositoryError> {
        let mut standings = self.standings.lock().map_err(|_| poisoned("standing"))?;
        standings.insert(standing.worker_id.clone(), standing);
        Ok(())
    }
}

/// Worker profiles registered in-process, e.g. from a seed file.
#[derive(Default)]
pub struct InMemoryWorkerDirectory {
    profiles: RwLock<HashMap<WorkerId, WorkerProfile>>,
}

impl InMemoryWorkerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = WorkerProfile>) -> Self {
        let directory = Self::new();
        if let Ok(mut map) = directory.profiles.write() {
            for profile in profiles {
                map.insert(profile.worker_id.clone(), profile);
            }
        }
        directory
    }

    pub fn register(&self, profile: WorkerProfile) -> Result<(), RepositoryError> {
        let mut profiles = self.profiles.write().map_err(|_| poisoned("directory"))?;
        profiles.insert(profile.worker_id.clone(), profile);
        Ok(())
    }
}

impl WorkerDirectory for InMemoryWorkerDirectory {
    fn profile(&self, worker_id: &WorkerId) -> Result<Option<WorkerProfile>, RepositoryError> {
        let profiles = self.profiles.read().map_err(|_| poisoned("directory"))?;
        Ok(profiles.get(worker_id).cloned())
    }

    fn pool(&self) -> Result<Vec<WorkerProfile>, RepositoryError> {
        let profiles = self.profiles.read().map_err(|_| poisoned("directory"))?;
        let mut pool: Vec<WorkerProfile> = profiles.values().cloned().collect();
        pool.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(pool)
    }
}
