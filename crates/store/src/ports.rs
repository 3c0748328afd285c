//! Repository ports.
//!
//! Narrow capability traits the use cases are constructed with. Every read
//! is ownership-scoped: a session that exists but belongs to someone else
//! is `NOT_FOUND`, never a permission error. Batch writes (segments, roles)
//! and the ledger append are single transactions in any conforming
//! implementation — partial writes must never be observable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cs_domain::error::Result;
use cs_domain::session::{Session, SessionStatus};
use cs_domain::transcript::{SpeakerRole, TranscriptSegment};
use cs_domain::usage::UsageLog;
use cs_domain::user::User;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait SessionRepo: Send + Sync {
    /// Ownership-scoped read.
    fn get(&self, session_id: Uuid, owner: Uuid) -> Result<Session>;

    /// Unscoped read for the worker tier and the reaper.
    fn get_any(&self, session_id: Uuid) -> Result<Session>;

    fn list(
        &self,
        owner: Uuid,
        status: Option<SessionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>>;

    /// Insert or replace the aggregate.
    fn save(&self, session: &Session) -> Result<()>;

    /// Compare-and-set: loads the session, verifies its status is
    /// `expected`, applies `apply`, and persists — all under one lock.
    /// This is the linearization point for every status transition;
    /// losing the race returns `STATE_CONFLICT`.
    fn update_if_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        apply: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session>;

    /// Replace the session's transcript in one atomic batch. Validates
    /// every segment before writing; on any failure nothing is written.
    fn save_segments(&self, session_id: Uuid, segments: &[TranscriptSegment]) -> Result<()>;

    fn clear_segments(&self, session_id: Uuid) -> Result<()>;

    /// Segments ordered by `start_seconds`.
    fn segments(&self, session_id: Uuid) -> Result<Vec<TranscriptSegment>>;

    /// Replace speaker-level role assignments in one batch.
    fn put_session_roles(
        &self,
        session_id: Uuid,
        roles: &HashMap<u32, SpeakerRole>,
    ) -> Result<()>;

    /// Replace segment-level role assignments in one batch. Each key must
    /// reference a segment of this session.
    fn put_segment_roles(
        &self,
        session_id: Uuid,
        roles: &HashMap<Uuid, SpeakerRole>,
    ) -> Result<()>;

    fn session_roles(&self, session_id: Uuid) -> Result<HashMap<u32, SpeakerRole>>;

    fn segment_roles(&self, session_id: Uuid) -> Result<HashMap<Uuid, SpeakerRole>>;

    /// Sessions currently in PROCESSING, for the reaper sweep.
    fn list_processing(&self) -> Result<Vec<Session>>;

    // ── Aggregates for quota ─────────────────────────────────────────

    fn count_sessions_since(&self, owner: Uuid, since: DateTime<Utc>) -> Result<u64>;

    fn sum_duration_seconds_since(&self, owner: Uuid, since: DateTime<Utc>) -> Result<u64>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Users
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait UserRepo: Send + Sync {
    fn get(&self, user_id: Uuid) -> Result<User>;

    fn get_by_email(&self, email: &str) -> Result<User>;

    fn save(&self, user: &User) -> Result<()>;

    /// Load-modify-store under the store's write lock — the row-level-lock
    /// analogue used for counter updates.
    fn update(
        &self,
        user_id: Uuid,
        apply: &mut dyn FnMut(&mut User) -> Result<()>,
    ) -> Result<User>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait UsageRepo: Send + Sync {
    /// Append the log and apply the user counter update as one unit of
    /// work: readers never observe one without the other. A log with the
    /// same `(session_id, transcription_type)` already present is rejected
    /// with `STATE_CONFLICT` and the counter update is not applied.
    fn append_with_counters(
        &self,
        log: UsageLog,
        advance_user: &mut dyn FnMut(&mut User) -> Result<()>,
    ) -> Result<UsageLog>;

    fn for_session(&self, session_id: Uuid) -> Result<Vec<UsageLog>>;

    fn for_user_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<UsageLog>>;
}
