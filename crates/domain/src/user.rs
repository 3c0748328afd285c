//! Users, plans, and monthly usage counters.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserPlan {
    Free,
    Student,
    Pro,
    Enterprise,
    CoachingSchool,
}

impl UserPlan {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Student => "student",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
            Self::CoachingSchool => "coaching_school",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    User,
    Staff,
    Admin,
    SuperAdmin,
}

/// Account with monthly usage counters and cumulative totals.
///
/// `current_month_start` marks the UTC calendar month the monthly counters
/// belong to. Rollover is observed lazily: the first admission or billable
/// event after the boundary resets the counters atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub plan: UserPlan,
    #[serde(default)]
    pub role: UserRole,

    // Monthly window counters
    pub usage_minutes: u32,
    pub session_count: u32,
    pub transcription_count: u32,
    pub exports_this_month: u32,
    pub current_month_start: DateTime<Utc>,

    // Cumulative totals
    pub total_minutes_processed: u64,
    pub total_transcriptions: u64,
    pub total_cost_cents: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, plan: UserPlan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            plan,
            role: UserRole::User,
            usage_minutes: 0,
            session_count: 0,
            transcription_count: 0,
            exports_this_month: 0,
            current_month_start: month_start(now),
            total_minutes_processed: 0,
            total_transcriptions: 0,
            total_cost_cents: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the UTC calendar month has rolled over since the counters
    /// were last reset.
    pub fn month_rolled_over(&self, now: DateTime<Utc>) -> bool {
        self.current_month_start < month_start(now)
    }

    /// Reset the monthly counters for a new window. Callers apply this
    /// inside the same unit of work as the admission or ledger write that
    /// observed the rollover.
    pub fn reset_monthly_counters(&mut self, now: DateTime<Utc>) {
        self.usage_minutes = 0;
        self.session_count = 0;
        self.transcription_count = 0;
        self.exports_this_month = 0;
        self.current_month_start = month_start(now);
        self.updated_at = now;
    }
}

/// First instant of the UTC calendar month containing `t`.
pub fn month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid instant")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_start_truncates() {
        let t = Utc.with_ymd_and_hms(2025, 3, 17, 13, 45, 9).unwrap();
        assert_eq!(
            month_start(t),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn rollover_boundary_is_exact() {
        let mut user = User::new("a@b.c".into(), UserPlan::Free);
        user.current_month_start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();

        let last_second = Utc.with_ymd_and_hms(2025, 2, 28, 23, 59, 59).unwrap();
        assert!(!user.month_rolled_over(last_second));

        let first_second = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert!(user.month_rolled_over(first_second));
    }

    #[test]
    fn reset_clears_monthly_not_cumulative() {
        let mut user = User::new("a@b.c".into(), UserPlan::Pro);
        user.usage_minutes = 42;
        user.exports_this_month = 3;
        user.total_minutes_processed = 900;

        let now = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 1).unwrap();
        user.reset_monthly_counters(now);
        assert_eq!(user.usage_minutes, 0);
        assert_eq!(user.exports_this_month, 0);
        assert_eq!(user.current_month_start, month_start(now));
        assert_eq!(user.total_minutes_processed, 900);
    }
}
