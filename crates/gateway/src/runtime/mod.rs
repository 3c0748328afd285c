//! Job runtime: the state-machine orchestrator, the worker pool that runs
//! provider jobs off the request path, the queue joining the two tiers,
//! per-session cancellation tokens, and the reaper that restores runs
//! whose worker died.

pub mod cancel;
pub mod orchestrator;
pub mod queue;
pub mod reaper;
pub mod worker;

pub use cancel::{CancelMap, CancelToken};
pub use orchestrator::Orchestrator;
pub use queue::{JobQueue, JobTicket, MemoryJobQueue};
