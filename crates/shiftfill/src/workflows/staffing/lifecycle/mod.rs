//! Shift and assignment state machines.

mod assignment;
mod shift;

pub use assignment::{
    AdminCancellation, AssignmentLifecycle, AttendancePolicy, Compensation, CompletionSignal,
    NoShowOutcome,
};
pub use shift::{BulkApproval, ShiftCancellation, ShiftLifecycle, ShiftRemoval};
pub(crate) use shift::require_admin;
