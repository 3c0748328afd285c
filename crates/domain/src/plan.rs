//! Plan limit tables.
//!
//! A [`PlanConfiguration`] is an immutable snapshot as seen by a single
//! admission decision. `-1` means unlimited. The built-in table can be
//! overridden per plan from configuration.

use serde::{Deserialize, Serialize};

use crate::user::UserPlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Transcribed minutes per calendar month; -1 = unlimited.
    pub max_minutes: i64,
    pub max_file_size_mb: u32,
    /// Exports per calendar month; -1 = unlimited.
    pub max_exports_per_month: i64,
    pub export_formats: Vec<String>,
    pub concurrent_processing: u32,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfiguration {
    pub plan: UserPlan,
    pub display_name: String,
    pub limits: PlanLimits,
}

impl PlanConfiguration {
    /// Built-in limit table, overridable from config.
    pub fn defaults_for(plan: UserPlan) -> Self {
        let (display_name, limits) = match plan {
            UserPlan::Free => (
                "Free",
                PlanLimits {
                    max_minutes: 120,
                    max_file_size_mb: 60,
                    max_exports_per_month: 10,
                    export_formats: vec!["json".into(), "txt".into()],
                    concurrent_processing: 1,
                    retention_days: 30,
                },
            ),
            UserPlan::Student => (
                "Student",
                PlanLimits {
                    max_minutes: 300,
                    max_file_size_mb: 100,
                    max_exports_per_month: 30,
                    export_formats: vec!["json".into(), "txt".into(), "vtt".into(), "srt".into()],
                    concurrent_processing: 1,
                    retention_days: 90,
                },
            ),
            UserPlan::Pro => (
                "Pro",
                PlanLimits {
                    max_minutes: 1200,
                    max_file_size_mb: 200,
                    max_exports_per_month: -1,
                    export_formats: vec![
                        "json".into(),
                        "txt".into(),
                        "vtt".into(),
                        "srt".into(),
                        "xlsx".into(),
                    ],
                    concurrent_processing: 3,
                    retention_days: 365,
                },
            ),
            UserPlan::Enterprise => (
                "Enterprise",
                PlanLimits {
                    max_minutes: -1,
                    max_file_size_mb: 500,
                    max_exports_per_month: -1,
                    export_formats: vec![
                        "json".into(),
                        "txt".into(),
                        "vtt".into(),
                        "srt".into(),
                        "xlsx".into(),
                    ],
                    concurrent_processing: 10,
                    retention_days: 730,
                },
            ),
            UserPlan::CoachingSchool => (
                "Coaching School",
                PlanLimits {
                    max_minutes: -1,
                    max_file_size_mb: 500,
                    max_exports_per_month: -1,
                    export_formats: vec![
                        "json".into(),
                        "txt".into(),
                        "vtt".into(),
                        "srt".into(),
                        "xlsx".into(),
                    ],
                    concurrent_processing: 10,
                    retention_days: 730,
                },
            ),
        };
        Self {
            plan,
            display_name: display_name.to_string(),
            limits,
        }
    }

    pub fn minutes_unlimited(&self) -> bool {
        self.limits.max_minutes < 0
    }

    pub fn exports_unlimited(&self) -> bool {
        self.limits.max_exports_per_month < 0
    }

    pub fn allows_export_format(&self, format: &str) -> bool {
        self.limits
            .export_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_matches_published_limits() {
        let cfg = PlanConfiguration::defaults_for(UserPlan::Free);
        assert_eq!(cfg.limits.max_minutes, 120);
        assert!(!cfg.minutes_unlimited());
        assert!(cfg.allows_export_format("json"));
        assert!(cfg.allows_export_format("TXT"));
        assert!(!cfg.allows_export_format("xlsx"));
    }

    #[test]
    fn enterprise_is_unlimited() {
        let cfg = PlanConfiguration::defaults_for(UserPlan::Enterprise);
        assert!(cfg.minutes_unlimited());
        assert!(cfg.exports_unlimited());
        assert!(cfg.allows_export_format("xlsx"));
    }
}
