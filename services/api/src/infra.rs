use metrics_exporter_prometheus::PrometheusHandle;
use shiftfill::error::AppError;
use shiftfill::workflows::staffing::{
    Notification, Notifier, NotifyError, PaymentProvider, ProviderError, ProviderReceipt,
    ProviderRequest, SuspensionError, SuspensionSignal, SuspensionSink, WorkerProfile,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Hands notifications to the log. The demo keeps a copy of each one.
#[derive(Default)]
pub(crate) struct LoggingNotifier {
    captured: Option<Mutex<Vec<Notification>>>,
}

impl LoggingNotifier {
    pub(crate) fn capturing() -> Self {
        Self {
            captured: Some(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn delivered(&self) -> Vec<Notification> {
        self.captured
            .as_ref()
            .and_then(|captured| captured.lock().ok().map(|guard| guard.clone()))
            .unwrap_or_default()
    }
}

impl Notifier for LoggingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            recipient = ?notification.recipient,
            event = ?notification.event,
            details = ?notification.details,
            "notification dispatched"
        );
        if let Some(captured) = &self.captured {
            captured
                .lock()
                .map_err(|_| NotifyError::Transport("notification log poisoned".to_string()))?
                .push(notification);
        }
        Ok(())
    }
}

/// Stand-in for a payment gateway. Requests are settled once per idempotency key and replays
/// return the original receipt.
#[derive(Default)]
pub(crate) struct SimulatedPaymentProvider {
    receipts: Mutex<HashMap<String, ProviderReceipt>>,
    sequence: AtomicU64,
    outage: AtomicBool,
}

impl SimulatedPaymentProvider {
    /// While set, every request fails as if the gateway were unreachable.
    pub(crate) fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::Release);
    }

    fn settle(&self, operation: &str, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        if self.outage.load(Ordering::Acquire) {
            warn!(operation, key = %request.idempotency_key, "simulated gateway outage");
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }
        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| ProviderError::Unavailable("receipt log poisoned".to_string()))?;
        if let Some(receipt) = receipts.get(&request.idempotency_key) {
            return Ok(receipt.clone());
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let receipt = ProviderReceipt {
            reference: format!("sim-{operation}-{sequence:06}"),
        };
        info!(
            operation,
            key = %request.idempotency_key,
            amount_cents = request.amount_cents,
            reference = %receipt.reference,
            "simulated gateway settled request"
        );
        receipts.insert(request.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

impl PaymentProvider for SimulatedPaymentProvider {
    fn charge_or_hold(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        self.settle("hold", request)
    }

    fn release_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        self.settle("release", request)
    }

    fn refund_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
        self.settle("refund", request)
    }
}

/// Records suspension signals in the log until an appeal service is wired in.
#[derive(Default)]
pub(crate) struct LoggingSuspensionSink;

impl SuspensionSink for LoggingSuspensionSink {
    fn strike_threshold_exceeded(&self, signal: SuspensionSignal) -> Result<(), SuspensionError> {
        warn!(
            worker_id = %signal.worker_id,
            strikes = signal.strikes,
            threshold = signal.threshold,
            suspended_until = %signal.suspended_until,
            triggered_by = %signal.triggered_by,
            "worker suspended for repeated no-shows"
        );
        Ok(())
    }
}

/// Reads a JSON array of worker profiles.
pub(crate) fn load_worker_seed(path: &Path) -> Result<Vec<WorkerProfile>, AppError> {
    let reader = BufReader::new(File::open(path)?);
    let profiles: Vec<WorkerProfile> = serde_json::from_reader(reader)?;
    info!(path = %path.display(), workers = profiles.len(), "worker seed loaded");
    Ok(profiles)
}
