//! Domain types shared across all CoachScribe crates.
//!
//! This crate holds the Session aggregate and its state machine, transcript
//! segments and role overlays, usage accounting records, user/plan
//! definitions, the shared error type, and the configuration tree. It has no
//! I/O of its own; every state-changing rule lives here as a pure method so
//! the stores and the orchestrator only decide *when* to apply them.

pub mod config;
pub mod error;
pub mod plan;
pub mod session;
pub mod transcript;
pub mod usage;
pub mod user;

pub use error::{Error, Result};
pub use plan::{PlanConfiguration, PlanLimits};
pub use session::{Session, SessionStatus, SttSelector, SttVendor};
pub use transcript::{SpeakerRole, TranscriptSegment};
pub use usage::{TranscriptionType, UsageLog};
pub use user::{User, UserPlan, UserRole};
