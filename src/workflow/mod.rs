//! Run bookkeeping: identity, phases and the batches handed to the engine.

mod types;

pub use types::{RunId, RunPhase, RunStatus, RunSummary, Workflow};
