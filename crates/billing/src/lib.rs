//! Quota admission and usage accounting.
//!
//! [`quota`] decides whether an action may proceed under the owner's plan
//! for the current UTC calendar month. [`ledger`] appends immutable usage
//! logs and advances the owner's counters in the same unit of work.

pub mod ledger;
pub mod quota;

pub use ledger::{QualityStats, UsageLedger};
pub use quota::{Admission, PlanTable, QuotaAction, QuotaService};
