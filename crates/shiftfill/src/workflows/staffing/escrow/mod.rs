//! Escrow of shift payments against the external payment provider.

mod domain;
mod ledger;

pub use domain::{
    DisputeOutcome, DisputeRecord, HoldRequest, PaymentEvent, PaymentFailure, PaymentStatus,
    PendingOperation, ShiftPayment,
};
pub use ledger::{EscrowLedger, ReleaseSweep};
