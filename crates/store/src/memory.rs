//! In-process reference store.
//!
//! One `RwLock` over the whole dataset, so cross-entity writes (segments +
//! session snapshot, usage log + user counters) are naturally atomic. This
//! is the dev/test composition; a relational backend implements the same
//! ports with real transactions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use cs_domain::error::{Error, Result};
use cs_domain::session::{Session, SessionStatus};
use cs_domain::transcript::{SpeakerRole, TranscriptSegment};
use cs_domain::usage::UsageLog;
use cs_domain::user::User;

use crate::ports::{SessionRepo, UsageRepo, UserRepo};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    /// session id → segments ordered by start.
    segments: HashMap<Uuid, Vec<TranscriptSegment>>,
    /// session id → speaker id → role.
    session_roles: HashMap<Uuid, HashMap<u32, SpeakerRole>>,
    /// session id → segment id → role.
    segment_roles: HashMap<Uuid, HashMap<Uuid, SpeakerRole>>,
    usage_logs: Vec<UsageLog>,
}

/// Shared in-memory store implementing every repository port.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionRepo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl SessionRepo for MemoryStore {
    fn get(&self, session_id: Uuid, owner: Uuid) -> Result<Session> {
        let inner = self.inner.read();
        inner
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id == owner)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn get_any(&self, session_id: Uuid) -> Result<Session> {
        let inner = self.inner.read();
        inner
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn list(
        &self,
        owner: Uuid,
        status: Option<SessionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>> {
        let inner = self.inner.read();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == owner)
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        // Newest first, like any session listing a user expects.
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.inner
            .write()
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    fn update_if_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        apply: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(&session_id).ok_or(Error::NotFound)?;
        if session.status != expected {
            return Err(Error::StateConflict(format!(
                "expected status {expected}, found {}",
                session.status
            )));
        }
        apply(session)?;
        Ok(session.clone())
    }

    fn save_segments(&self, session_id: Uuid, segments: &[TranscriptSegment]) -> Result<()> {
        for segment in segments {
            segment.validate()?;
            if segment.session_id != session_id {
                return Err(Error::Validation(
                    "segment does not belong to this session".into(),
                ));
            }
        }
        let mut sorted: Vec<TranscriptSegment> = segments.to_vec();
        sorted.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&session_id) {
            return Err(Error::NotFound);
        }
        inner.segments.insert(session_id, sorted);
        Ok(())
    }

    fn clear_segments(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        inner.segments.remove(&session_id);
        inner.segment_roles.remove(&session_id);
        Ok(())
    }

    fn segments(&self, session_id: Uuid) -> Result<Vec<TranscriptSegment>> {
        let inner = self.inner.read();
        Ok(inner.segments.get(&session_id).cloned().unwrap_or_default())
    }

    fn put_session_roles(
        &self,
        session_id: Uuid,
        roles: &HashMap<u32, SpeakerRole>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&session_id) {
            return Err(Error::NotFound);
        }
        inner.session_roles.insert(session_id, roles.clone());
        Ok(())
    }

    fn put_segment_roles(
        &self,
        session_id: Uuid,
        roles: &HashMap<Uuid, SpeakerRole>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&session_id) {
            return Err(Error::NotFound);
        }
        let known: std::collections::HashSet<Uuid> = inner
            .segments
            .get(&session_id)
            .map(|segs| segs.iter().map(|s| s.id).collect())
            .unwrap_or_default();
        for segment_id in roles.keys() {
            if !known.contains(segment_id) {
                return Err(Error::Validation(format!(
                    "segment {segment_id} does not belong to this session"
                )));
            }
        }
        inner.segment_roles.insert(session_id, roles.clone());
        Ok(())
    }

    fn session_roles(&self, session_id: Uuid) -> Result<HashMap<u32, SpeakerRole>> {
        let inner = self.inner.read();
        Ok(inner
            .session_roles
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn segment_roles(&self, session_id: Uuid) -> Result<HashMap<Uuid, SpeakerRole>> {
        let inner = self.inner.read();
        Ok(inner
            .segment_roles
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_processing(&self) -> Result<Vec<Session>> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Processing)
            .cloned()
            .collect())
    }

    fn count_sessions_since(&self, owner: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.user_id == owner && s.created_at >= since)
            .count() as u64)
    }

    fn sum_duration_seconds_since(&self, owner: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.user_id == owner && s.created_at >= since)
            .filter_map(|s| s.duration_seconds)
            .map(u64::from)
            .sum())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UserRepo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl UserRepo for MemoryStore {
    fn get(&self, user_id: Uuid) -> Result<User> {
        let inner = self.inner.read();
        inner.users.get(&user_id).cloned().ok_or(Error::NotFound)
    }

    fn get_by_email(&self, email: &str) -> Result<User> {
        let inner = self.inner.read();
        inner
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn save(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.write();
        let duplicate = inner
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id);
        if duplicate {
            return Err(Error::Validation(format!(
                "email {} is already registered",
                user.email
            )));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    fn update(
        &self,
        user_id: Uuid,
        apply: &mut dyn FnMut(&mut User) -> Result<()>,
    ) -> Result<User> {
        let mut inner = self.inner.write();
        let user = inner.users.get_mut(&user_id).ok_or(Error::NotFound)?;
        apply(user)?;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UsageRepo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl UsageRepo for MemoryStore {
    fn append_with_counters(
        &self,
        log: UsageLog,
        advance_user: &mut dyn FnMut(&mut User) -> Result<()>,
    ) -> Result<UsageLog> {
        let mut inner = self.inner.write();

        // Uniqueness on (session, kind): a redelivered completion must not
        // double-bill. Callers treat this rejection as idempotent.
        let duplicate = inner.usage_logs.iter().any(|l| {
            l.session_id == log.session_id && l.transcription_type == log.transcription_type
        });
        if duplicate {
            return Err(Error::StateConflict(format!(
                "usage log ({}, {}) already exists",
                log.session_id,
                log.transcription_type.as_str()
            )));
        }

        let user = inner.users.get_mut(&log.user_id).ok_or(Error::NotFound)?;
        advance_user(user)?;
        user.updated_at = Utc::now();

        inner.usage_logs.push(log.clone());
        Ok(log)
    }

    fn for_session(&self, session_id: Uuid) -> Result<Vec<UsageLog>> {
        let inner = self.inner.read();
        let mut logs: Vec<UsageLog> = inner
            .usage_logs
            .iter()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.created_at);
        Ok(logs)
    }

    fn for_user_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<UsageLog>> {
        let inner = self.inner.read();
        let mut logs: Vec<UsageLog> = inner
            .usage_logs
            .iter()
            .filter(|l| l.user_id == user_id && l.created_at >= since)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.created_at);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::session::SttSelector;
    use cs_domain::usage::{duration_minutes, TranscriptionType};
    use cs_domain::user::UserPlan;

    fn store_with_user() -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let user = User::new("coach@example.com".into(), UserPlan::Free);
        UserRepo::save(&store, &user).unwrap();
        (store, user)
    }

    fn make_session(store: &MemoryStore, owner: Uuid) -> Session {
        let session = Session::new(
            owner,
            "s".into(),
            "en-US".into(),
            SttSelector::Auto,
        );
        SessionRepo::save(store, &session).unwrap();
        session
    }

    fn make_segment(session_id: Uuid, speaker: u32, start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment::new(session_id, speaker, start, end, "text".into(), Some(0.9))
    }

    #[test]
    fn reads_are_ownership_scoped() {
        let (store, user) = store_with_user();
        let session = make_session(&store, user.id);

        assert!(SessionRepo::get(&store, session.id, user.id).is_ok());
        let stranger = Uuid::new_v4();
        assert_eq!(
            SessionRepo::get(&store, session.id, stranger).unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn cas_rejects_unexpected_status() {
        let (store, user) = store_with_user();
        let session = make_session(&store, user.id);

        let err = store
            .update_if_status(session.id, SessionStatus::Pending, &mut |_s| Ok(()))
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");

        let updated = store
            .update_if_status(session.id, SessionStatus::Uploading, &mut |s| {
                s.mark_audio_uploaded("p".into(), "f.mp3".into())
            })
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Pending);
    }

    #[test]
    fn cas_failure_leaves_state_untouched() {
        let (store, user) = store_with_user();
        let session = make_session(&store, user.id);

        let err = store
            .update_if_status(session.id, SessionStatus::Uploading, &mut |s| {
                s.begin_processing("j".into(), cs_domain::session::SttVendor::Google)
            })
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT"); // no audio yet
        let reread = store.get_any(session.id).unwrap();
        assert_eq!(reread.status, SessionStatus::Uploading);
    }

    #[test]
    fn segment_batch_is_all_or_nothing() {
        let (store, user) = store_with_user();
        let session = make_session(&store, user.id);

        let bad = vec![
            make_segment(session.id, 1, 0.0, 1.0),
            make_segment(session.id, 1, 2.0, 1.5), // inverted
        ];
        assert!(store.save_segments(session.id, &bad).is_err());
        assert!(store.segments(session.id).unwrap().is_empty());

        let good = vec![
            make_segment(session.id, 2, 3.0, 4.0),
            make_segment(session.id, 1, 0.0, 1.0),
        ];
        store.save_segments(session.id, &good).unwrap();
        let stored = store.segments(session.id).unwrap();
        assert_eq!(stored.len(), 2);
        // Ordered by start time regardless of input order.
        assert!(stored[0].start_seconds < stored[1].start_seconds);
    }

    #[test]
    fn segment_roles_must_reference_known_segments() {
        let (store, user) = store_with_user();
        let session = make_session(&store, user.id);
        let seg = make_segment(session.id, 1, 0.0, 1.0);
        store.save_segments(session.id, &[seg.clone()]).unwrap();

        let mut good = HashMap::new();
        good.insert(seg.id, SpeakerRole::Client);
        store.put_segment_roles(session.id, &good).unwrap();

        let mut bad = HashMap::new();
        bad.insert(Uuid::new_v4(), SpeakerRole::Coach);
        assert_eq!(
            store.put_segment_roles(session.id, &bad).unwrap_err().code(),
            "VALIDATION"
        );
        // The earlier write is still in place.
        assert_eq!(store.segment_roles(session.id).unwrap().len(), 1);
    }

    #[test]
    fn ledger_append_is_atomic_with_counters() {
        let (store, user) = store_with_user();
        let session = make_session(&store, user.id);

        let log = UsageLog {
            id: Uuid::new_v4(),
            user_id: user.id,
            session_id: session.id,
            transcription_type: TranscriptionType::Original,
            duration_minutes: duration_minutes(300),
            duration_seconds: 300,
            billable: true,
            cost_cents: 15,
            currency: "TWD".into(),
            billing_reason: None,
            provider: None,
            word_count: None,
            character_count: None,
            speaker_count: Some(2),
            confidence_score: Some(0.9),
            created_at: Utc::now(),
        };

        store
            .append_with_counters(log.clone(), &mut |u| {
                u.usage_minutes += 5;
                Ok(())
            })
            .unwrap();
        assert_eq!(UserRepo::get(&store, user.id).unwrap().usage_minutes, 5);

        // Duplicate ORIGINAL: rejected, counters unchanged.
        let err = store
            .append_with_counters(log, &mut |u| {
                u.usage_minutes += 5;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");
        assert_eq!(UserRepo::get(&store, user.id).unwrap().usage_minutes, 5);
        assert_eq!(store.for_session(session.id).unwrap().len(), 1);
    }

    #[test]
    fn quota_aggregates_window_by_instant() {
        let (store, user) = store_with_user();
        let cutoff = Utc::now() - chrono::Duration::days(1);

        let mut old = Session::new(user.id, "old".into(), "en-US".into(), SttSelector::Auto);
        old.created_at = Utc::now() - chrono::Duration::days(10);
        old.duration_seconds = Some(600);
        SessionRepo::save(&store, &old).unwrap();

        let mut recent = make_session(&store, user.id);
        recent.duration_seconds = Some(240);
        SessionRepo::save(&store, &recent).unwrap();

        assert_eq!(store.count_sessions_since(user.id, cutoff).unwrap(), 1);
        assert_eq!(store.sum_duration_seconds_since(user.id, cutoff).unwrap(), 240);
    }

    #[test]
    fn duplicate_email_rejected() {
        let (store, _user) = store_with_user();
        let dupe = User::new("coach@example.com".into(), UserPlan::Pro);
        assert!(UserRepo::save(&store, &dupe).is_err());
    }

    #[test]
    fn list_filters_and_paginates() {
        let (store, user) = store_with_user();
        for _ in 0..5 {
            make_session(&store, user.id);
        }
        let mut cancelled = make_session(&store, user.id);
        cancelled.cancel().unwrap();
        SessionRepo::save(&store, &cancelled).unwrap();

        let all = store.list(user.id, None, 100, 0).unwrap();
        assert_eq!(all.len(), 6);
        let uploading = store
            .list(user.id, Some(SessionStatus::Uploading), 100, 0)
            .unwrap();
        assert_eq!(uploading.len(), 5);
        let page = store.list(user.id, None, 2, 4).unwrap();
        assert_eq!(page.len(), 2);
    }
}
