use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::to_bytes;
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::staffing::{
    Actor, AgencyTier, AvailabilityWindow, BusinessId, Collaborators, GeoPoint,
    InMemoryStandingRepository, InMemoryWorkerDirectory, MarketplaceService, MarketplaceSettings,
    Notification, NotificationEvent, Notifier, NotifyError, PaymentProvider, ProviderError,
    ProviderReceipt, ProviderRequest, Recipient, RepositoryError, Shift, ShiftPosting,
    StandingRepository, SuspensionError, SuspensionSignal, SuspensionSink, Urgency, WorkerId,
    WorkerProfile, WorkerStanding,
};

pub(super) const SHIFT_AMOUNT_CENTS: u64 = 20_000;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub(super) fn shift_start() -> DateTime<Utc> {
    now() + Duration::days(1)
}

pub(super) fn shift_end() -> DateTime<Utc> {
    shift_start() + Duration::hours(8)
}

pub(super) fn site() -> GeoPoint {
    GeoPoint::new(40.7128, -74.0060)
}

pub(super) fn admin() -> Actor {
    Actor::Admin("ops".to_string())
}

pub(super) fn business() -> Actor {
    Actor::Business(BusinessId::from("biz-1"))
}

pub(super) fn worker(id: &str) -> WorkerId {
    WorkerId::from(id)
}

pub(super) fn skills(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub(super) fn posting() -> ShiftPosting {
    ShiftPosting {
        business_id: BusinessId::from("biz-1"),
        title: "Warehouse picker".to_string(),
        industry: "warehouse".to_string(),
        required_skills: skills(&["forklift", "inventory"]),
        required_certifications: BTreeSet::new(),
        location: site(),
        radius_km: 25.0,
        starts_at: shift_start(),
        ends_at: shift_end(),
        urgency: Urgency::Normal,
        gross_amount_cents: SHIFT_AMOUNT_CENTS,
    }
}

/// A qualified worker a couple of kilometres from the site, available for the whole shift.
pub(super) fn nearby(id: &str) -> WorkerProfile {
    WorkerProfile {
        worker_id: worker(id),
        display_name: format!("Worker {id}"),
        skills: skills(&["forklift", "inventory"]),
        certifications: skills(&["osha-10"]),
        location: GeoPoint::new(40.7306, -73.9866),
        availability: vec![AvailabilityWindow {
            starts_at: shift_start() - Duration::hours(2),
            ends_at: shift_end() + Duration::hours(2),
        }],
        tier: AgencyTier::Standard,
        urgent_acceptance_rate: Some(0.8),
        joined_at: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
    }
}

/// Qualified, but roughly 90km north of the site.
pub(super) fn far_away(id: &str) -> WorkerProfile {
    WorkerProfile {
        location: GeoPoint::new(41.5, -74.0),
        ..nearby(id)
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(super) fn events_for(&self, recipient: &Recipient) -> Vec<NotificationEvent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|notification| &notification.recipient == recipient)
            .map(|notification| notification.event)
            .collect()
    }

    pub(super) fn count(&self, event: NotificationEvent) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|notification| notification.event == event)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp down".to_string()))
    }
}

/// Payment provider double. Honors idempotency keys the way a real provider would and can be
/// told to fail the next calls of a given operation.
#[derive(Default)]
pub(super) struct ScriptedProvider {
    calls: Mutex<Vec<(&'static str, ProviderRequest)>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    settled: Mutex<HashSet<String>>,
}

impl ScriptedProvider {
    pub(super) fn fail_next(&self, operation: &'static str, times: u32) {
        self.failures.lock().unwrap().insert(operation, times);
    }

    pub(super) fn calls(&self, operation: &str) -> Vec<ProviderRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == operation)
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Keys that reached the provider and succeeded.
    pub(super) fn settled_keys(&self) -> usize {
        self.settled.lock().unwrap().len()
    }

    fn handle(
        &self,
        operation: &'static str,
        request: &ProviderRequest,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.calls.lock().unwrap().push((operation, request.clone()));
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Unavailable("gateway timeout".to_string()));
            }
        }
        self.settled
            .lock()
            .unwrap()
            .insert(request.idempotency_key.clone());
        Ok(ProviderReceipt {
            reference: format!("ref-{}", request.idempotency_key),
        })
    }
}

impl PaymentProvider for ScriptedProvider {
    fn charge_or_hold(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        self.handle("hold", request)
    }

    fn release_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        self.handle("release", request)
    }

    fn refund_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        self.handle("refund", request)
    }
}

#[derive(Default)]
pub(super) struct RecordingSuspensionSink {
    pub(super) signals: Mutex<Vec<SuspensionSignal>>,
    pub(super) unavailable: bool,
}

impl SuspensionSink for RecordingSuspensionSink {
    fn strike_threshold_exceeded(&self, signal: SuspensionSignal) -> Result<(), SuspensionError> {
        if self.unavailable {
            return Err(SuspensionError::Unavailable("appeals queue offline".to_string()));
        }
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}

/// Standing storage whose writes can be switched off to simulate an outage.
#[derive(Default)]
pub(super) struct FlakyStandingRepository {
    inner: InMemoryStandingRepository,
    down: AtomicBool,
}

impl FlakyStandingRepository {
    pub(super) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl StandingRepository for FlakyStandingRepository {
    fn fetch(&self, worker_id: &WorkerId) -> Result<Option<WorkerStanding>, RepositoryError> {
        self.inner.fetch(worker_id)
    }

    fn upsert(&self, standing: WorkerStanding) -> Result<(), RepositoryError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("standing store offline".to_string()));
        }
        self.inner.upsert(standing)
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<MarketplaceService>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) provider: Arc<ScriptedProvider>,
    pub(super) suspensions: Arc<RecordingSuspensionSink>,
    pub(super) directory: Arc<InMemoryWorkerDirectory>,
}

pub(super) fn build_service(profiles: Vec<WorkerProfile>) -> Harness {
    build_service_with(profiles, MarketplaceSettings::default())
}

pub(super) fn build_service_with(
    profiles: Vec<WorkerProfile>,
    settings: MarketplaceSettings,
) -> Harness {
    build_service_on(profiles, settings, Arc::new(InMemoryStandingRepository::new()))
}

/// Like [`build_service_with`], storing worker standings in `standings`.
pub(super) fn build_service_on(
    profiles: Vec<WorkerProfile>,
    settings: MarketplaceSettings,
    standings: Arc<dyn StandingRepository>,
) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let provider = Arc::new(ScriptedProvider::default());
    let suspensions = Arc::new(RecordingSuspensionSink::default());
    let directory = Arc::new(InMemoryWorkerDirectory::with_profiles(profiles));
    let mut collaborators = Collaborators::in_memory(
        directory.clone(),
        notifier.clone(),
        provider.clone(),
        suspensions.clone(),
    );
    collaborators.standings = standings;
    let service = MarketplaceService::new(collaborators, settings).expect("valid settings");
    Harness {
        service: Arc::new(service),
        notifier,
        provider,
        suspensions,
        directory,
    }
}

/// Posts and approves the default posting.
pub(super) fn open_shift(harness: &Harness) -> Shift {
    open_shift_from(harness, posting())
}

pub(super) fn open_shift_from(harness: &Harness, posting: ShiftPosting) -> Shift {
    let shift = harness
        .service
        .post_shift(posting, now())
        .expect("posting accepted");
    harness
        .service
        .approve_shift(&shift.id, &admin(), now())
        .expect("approval succeeds")
}

pub(super) async fn json_body(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}
