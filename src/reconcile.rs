//! Reconciliation of membership deltas against the external ledger: the
//! durable operation queue and the per-round derive/select/advance driver.

pub mod driver;
pub mod queue;

pub use driver::{
    AdvanceOutcome, ReconcileConfig, ReconcileDriver, ReconcileError, StalePolicy, StalledOperation,
    StepReport,
};
pub use queue::{OpKind, OpStatus, ReconcileOp, ReconcileQueue};
