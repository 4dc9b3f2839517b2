//! Lifecycle Engine
//!
//! Long-horizon maintenance of the memory: decay of unlinked episodic
//! events, duplicate-merge proposals, trajectory distillation and the
//! background worker that schedules all of it.

mod decay;
mod distill;
mod merge;
mod worker;

pub use decay::DecayReport;
pub use distill::Trajectory;
pub use merge::MergeCandidate;
pub use worker::{MaintenanceWorker, WorkerHandle};
