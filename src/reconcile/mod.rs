pub mod controller;
pub mod evaluator;
pub mod reconciler;

pub use controller::{ClaimEvent, Controller};
pub use evaluator::{Action, DesiredState, Observed, evaluate};
pub use reconciler::{
    ReconcileError, ReconcileOutcome, Reconciler, ReconcilerSettings, Requeue,
};
