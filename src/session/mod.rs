pub mod clock;
pub mod controller;
pub mod gate;
pub mod ledger;
pub mod reconciler;

pub use controller::{Phase, Progress, SessionController};
pub use gate::{GateOutcome, SubmissionGate};
pub use reconciler::{ReconcileState, ResultReconciler, ResultView};
