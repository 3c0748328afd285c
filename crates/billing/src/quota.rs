//! Plan-limit admission control.
//!
//! The decision itself is a pure function over (user, plan configuration,
//! action, now); [`QuotaService`] wires it to the user repository, applies
//! the lazy monthly rollover, and implements the failure policy: evaluator
//! errors fail open for non-billable checks and closed for billable ones.
//!
//! Monthly window boundary: first instant of the UTC calendar month.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cs_domain::config::{parse_plan, PlanOverride};
use cs_domain::error::{Error, Result};
use cs_domain::plan::PlanConfiguration;
use cs_domain::user::{User, UserPlan};
use cs_store::ports::UserRepo;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable per-process view of the plan limit tables: built-in defaults
/// with config overrides applied once at startup.
pub struct PlanTable {
    plans: HashMap<UserPlan, PlanConfiguration>,
}

impl PlanTable {
    pub fn from_overrides(overrides: &HashMap<String, PlanOverride>) -> Self {
        let mut plans = HashMap::new();
        for plan in [
            UserPlan::Free,
            UserPlan::Student,
            UserPlan::Pro,
            UserPlan::Enterprise,
            UserPlan::CoachingSchool,
        ] {
            let mut cfg = PlanConfiguration::defaults_for(plan);
            if let Some(ovr) = overrides
                .iter()
                .find(|(name, _)| parse_plan(name) == Some(plan))
                .map(|(_, o)| o)
            {
                if let Some(v) = ovr.max_minutes {
                    cfg.limits.max_minutes = v;
                }
                if let Some(v) = ovr.max_file_size_mb {
                    cfg.limits.max_file_size_mb = v;
                }
                if let Some(v) = ovr.max_exports_per_month {
                    cfg.limits.max_exports_per_month = v;
                }
                if let Some(ref v) = ovr.export_formats {
                    cfg.limits.export_formats = v.clone();
                }
                if let Some(v) = ovr.concurrent_processing {
                    cfg.limits.concurrent_processing = v;
                }
                if let Some(v) = ovr.retention_days {
                    cfg.limits.retention_days = v;
                }
            }
            plans.insert(plan, cfg);
        }
        Self { plans }
    }

    pub fn for_plan(&self, plan: UserPlan) -> &PlanConfiguration {
        // The table is total over the plan enum by construction.
        &self.plans[&plan]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions & decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Action presented for admission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuotaAction {
    /// No numeric gate (unlimited since phase 2); always admitted.
    CreateSession,
    /// No numeric gate; always admitted. Minutes are gated separately.
    Transcribe,
    /// Admit iff `usage_minutes + requested <= max_minutes` (or unlimited).
    CheckMinutes(u32),
    /// Admit iff `size_mb <= max_file_size_mb`.
    UploadFile(f64),
    /// Admit iff exports this month `< max_exports_per_month`.
    ExportTranscript,
}

/// A granted admission with the limit snapshot the decision saw.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The UTC month rolled over since the counters were last reset; the
    /// caller must reset them atomically as part of this admission.
    pub reset_counters: bool,
    pub plan: UserPlan,
    pub max_minutes: i64,
    pub usage_minutes: u32,
}

/// Pure admission decision. Counters are read as zero when the month has
/// rolled over — the caller resets them for real via [`QuotaService`].
pub fn evaluate(
    user: &User,
    plan_cfg: &PlanConfiguration,
    action: QuotaAction,
    now: DateTime<Utc>,
) -> Result<Admission> {
    let rolled = user.month_rolled_over(now);
    let usage_minutes = if rolled { 0 } else { user.usage_minutes };
    let exports = if rolled { 0 } else { user.exports_this_month };

    let admission = Admission {
        reset_counters: rolled,
        plan: user.plan,
        max_minutes: plan_cfg.limits.max_minutes,
        usage_minutes,
    };

    match action {
        QuotaAction::CreateSession | QuotaAction::Transcribe => Ok(admission),
        QuotaAction::CheckMinutes(requested) => {
            if plan_cfg.minutes_unlimited() {
                return Ok(admission);
            }
            let projected = i64::from(usage_minutes) + i64::from(requested);
            if projected <= plan_cfg.limits.max_minutes {
                Ok(admission)
            } else {
                Err(Error::QuotaExceeded {
                    used: i64::from(usage_minutes),
                    limit: plan_cfg.limits.max_minutes,
                    unit: "minutes",
                })
            }
        }
        QuotaAction::UploadFile(size_mb) => {
            if size_mb <= f64::from(plan_cfg.limits.max_file_size_mb) {
                Ok(admission)
            } else {
                Err(Error::FileTooLarge {
                    size_mb,
                    limit_mb: plan_cfg.limits.max_file_size_mb,
                })
            }
        }
        QuotaAction::ExportTranscript => {
            if plan_cfg.exports_unlimited()
                || i64::from(exports) < plan_cfg.limits.max_exports_per_month
            {
                Ok(admission)
            } else {
                Err(Error::QuotaExceeded {
                    used: i64::from(exports),
                    limit: plan_cfg.limits.max_exports_per_month,
                    unit: "exports",
                })
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QuotaService
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admission control wired to the user repository.
pub struct QuotaService {
    users: Arc<dyn UserRepo>,
    plans: PlanTable,
}

impl QuotaService {
    pub fn new(users: Arc<dyn UserRepo>, plans: PlanTable) -> Self {
        Self { users, plans }
    }

    pub fn plan_for(&self, plan: UserPlan) -> &PlanConfiguration {
        self.plans.for_plan(plan)
    }

    /// Run the admission decision for `user_id`, applying the counter
    /// reset when the decision observed a month rollover.
    ///
    /// `billable` selects the failure policy for infrastructure errors:
    /// billable checks fail closed, non-billable checks fail open.
    pub fn admit(&self, user_id: Uuid, action: QuotaAction, billable: bool) -> Result<Admission> {
        let now = Utc::now();
        let user = match self.users.get(user_id) {
            Ok(u) => u,
            Err(Error::NotFound) => return Err(Error::NotFound),
            Err(e) if billable => {
                tracing::error!(error = %e, "quota check failed closed");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "quota check failed open");
                return Ok(Admission {
                    reset_counters: false,
                    plan: UserPlan::Free,
                    max_minutes: -1,
                    usage_minutes: 0,
                });
            }
        };

        let plan_cfg = self.plans.for_plan(user.plan);
        let admission = evaluate(&user, plan_cfg, action, now)?;

        if admission.reset_counters {
            self.users.update(user_id, &mut |u| {
                // Another admission may have reset concurrently; the check
                // inside the write lock makes the reset happen once.
                if u.month_rolled_over(now) {
                    tracing::info!(user = %u.id, "monthly usage counters reset");
                    u.reset_monthly_counters(now);
                }
                Ok(())
            })?;
        }
        Ok(admission)
    }

    /// Whether the plan allows the export format at all.
    pub fn export_format_allowed(&self, plan: UserPlan, format: &str) -> bool {
        self.plans.for_plan(plan).allows_export_format(format)
    }

    /// Count one export against the monthly window.
    pub fn record_export(&self, user_id: Uuid) -> Result<()> {
        let now = Utc::now();
        self.users.update(user_id, &mut |u| {
            if u.month_rolled_over(now) {
                u.reset_monthly_counters(now);
            }
            u.exports_this_month += 1;
            Ok(())
        })?;
        Ok(())
    }
}
