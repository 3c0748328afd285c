//! Reaper: restores sessions whose worker died mid-run.
//!
//! A crash between provider success and the completion write leaves the
//! session PROCESSING forever. The reaper sweeps on an interval and fails
//! any run older than `max(minimum, multiplier × estimated run time)`
//! with a WORKER_LOST diagnostic; the user can then retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use cs_domain::config::ReaperConfig;
use cs_store::ports::SessionRepo;

use super::orchestrator::Orchestrator;

pub const WORKER_LOST: &str = "WORKER_LOST";

/// Spawn the periodic sweep.
pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<dyn SessionRepo>,
    config: ReaperConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_secs(config.tick_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let reaped = sweep(&orchestrator, sessions.as_ref(), &config, Utc::now());
            if reaped > 0 {
                tracing::warn!(reaped, "stuck transcription runs restored to FAILED");
            }
        }
    })
}

/// One sweep pass; returns how many runs were reaped.
pub fn sweep(
    orchestrator: &Orchestrator,
    sessions: &dyn SessionRepo,
    config: &ReaperConfig,
    now: DateTime<Utc>,
) -> usize {
    let processing = match sessions.list_processing() {
        Ok(list) => list,
        Err(e) => {
            tracing::error!(error = %e, "reaper sweep could not list sessions");
            return 0;
        }
    };

    let mut reaped = 0;
    for session in processing {
        let anchor = session
            .transcription_started_at
            .unwrap_or(session.updated_at);
        let budget = (config.timeout_multiplier
            * f64::from(session.estimated_processing_seconds()))
        .max(config.minimum_secs as f64) as i64;

        if (now - anchor).num_seconds() > budget {
            tracing::warn!(
                session = %session.id,
                started_at = %anchor,
                budget_secs = budget,
                "run exceeded its wall-clock budget"
            );
            if let Err(e) = orchestrator.fail_run(session.id, WORKER_LOST) {
                tracing::error!(session = %session.id, error = %e, "reap failed");
            } else {
                reaped += 1;
            }
        }
    }
    reaped
}
