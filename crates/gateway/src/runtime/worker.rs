//! Worker tier: runs provider jobs off the request path.
//!
//! A dispatcher drains the job queue and spawns one task per ticket,
//! bounded by a semaphore. Each run makes up to `max_attempts` passes at
//! the vendor with exponential backoff between transient failures,
//! heartbeats progress while the upstream job is open, and checks the
//! session's cancel token before resuming from every suspension point.
//! A run that ends FAILED is not retried here — retry is an explicit
//! user-initiated transition.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use cs_domain::config::WorkerConfig;
use cs_domain::error::Error;
use cs_stt::{SttJobRequest, SttJobState, SttProvider, SttRegistry, SttResult};

use super::cancel::{CancelMap, CancelToken};
use super::orchestrator::{estimate_progress, Orchestrator};
use super::queue::JobTicket;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backoff & diagnostics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exponential backoff: `initial × 2^(attempt-1)`, capped.
pub fn backoff_delay(attempt: u32, initial_secs: u64, cap_secs: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(initial_secs.saturating_mul(factor).min(cap_secs))
}

/// Short user-facing diagnostic for a failed run. Raw provider messages
/// stay in the logs, never on the session.
pub fn diagnostic(err: &Error) -> String {
    match err {
        Error::LangNotSupported { provider, language } => {
            format!("{provider} cannot transcribe language {language}")
        }
        Error::Provider { provider, .. } => {
            format!("UPSTREAM_FAILED: {provider} rejected the audio")
        }
        Error::UpstreamFailed(_) | Error::Http(_) | Error::Timeout(_) => {
            "UPSTREAM_FAILED: the transcription provider is unavailable".to_string()
        }
        _ => "transcription failed".to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the dispatcher loop. Runs until the queue side is dropped.
pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    stt: Arc<SttRegistry>,
    cancels: Arc<CancelMap>,
    config: WorkerConfig,
    mut rx: mpsc::Receiver<JobTicket>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let slots = Arc::new(Semaphore::new(config.concurrency));
        while let Some(ticket) = rx.recv().await {
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let orchestrator = orchestrator.clone();
            let stt = stt.clone();
            let cancels = cancels.clone();
            let config = config.clone();
            tokio::spawn(async move {
                run_job(orchestrator, stt, cancels, &config, ticket).await;
                drop(permit);
            });
        }
        tracing::info!("worker dispatcher stopped");
    })
}

/// Run one ticket to a terminal session write.
pub async fn run_job(
    orchestrator: Arc<Orchestrator>,
    stt: Arc<SttRegistry>,
    cancels: Arc<CancelMap>,
    config: &WorkerConfig,
    ticket: JobTicket,
) {
    let session_id = ticket.session_id;
    let token = cancels.register(session_id);

    let outcome = run_attempts(&orchestrator, &stt, config, &ticket, &token).await;
    let write = match outcome {
        RunOutcome::Completed(result) => orchestrator.complete_run(session_id, &result),
        RunOutcome::Cancelled => orchestrator.cancel_run_applied(session_id),
        RunOutcome::Failed(err) => {
            tracing::warn!(session = %session_id, error = %err, "run failed");
            orchestrator.fail_run(session_id, &diagnostic(&err))
        }
    };
    if let Err(e) = write {
        tracing::error!(session = %session_id, error = %e, "terminal session write failed");
    }
    cancels.remove(session_id);
}

enum RunOutcome {
    Completed(SttResult),
    Cancelled,
    Failed(Error),
}

enum RunInterrupt {
    Cancelled,
    Error(Error),
}

async fn run_attempts(
    orchestrator: &Orchestrator,
    stt: &SttRegistry,
    config: &WorkerConfig,
    ticket: &JobTicket,
    token: &CancelToken,
) -> RunOutcome {
    let provider = match stt.get(ticket.vendor) {
        Ok(p) => p,
        Err(e) => return RunOutcome::Failed(e),
    };

    for attempt in 1..=config.max_attempts {
        if token.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        match run_once(orchestrator, provider.as_ref(), config, ticket, token).await {
            Ok(result) => return RunOutcome::Completed(result),
            Err(RunInterrupt::Cancelled) => return RunOutcome::Cancelled,
            Err(RunInterrupt::Error(e)) if e.is_transient() && attempt < config.max_attempts => {
                let delay =
                    backoff_delay(attempt, config.backoff_initial_secs, config.backoff_cap_secs);
                tracing::warn!(
                    session = %ticket.session_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "transient upstream failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(RunInterrupt::Error(e)) => {
                let err = if e.is_transient() {
                    Error::UpstreamFailed(format!(
                        "exhausted {} attempts: {e}",
                        config.max_attempts
                    ))
                } else {
                    e
                };
                return RunOutcome::Failed(err);
            }
        }
    }
    RunOutcome::Failed(Error::UpstreamFailed(format!(
        "exhausted {} attempts",
        config.max_attempts
    )))
}

/// One pass: submit, poll with heartbeats, fetch. A cancellation observed
/// at any suspension point attempts the upstream cancel and bails out.
async fn run_once(
    orchestrator: &Orchestrator,
    provider: &dyn SttProvider,
    config: &WorkerConfig,
    ticket: &JobTicket,
    token: &CancelToken,
) -> Result<SttResult, RunInterrupt> {
    let request = SttJobRequest {
        audio_uri: ticket.blob_uri.clone(),
        language: ticket.language.clone(),
        speaker_hint: None,
    };
    let handle = provider
        .start_job(&request)
        .await
        .map_err(RunInterrupt::Error)?;
    let _ = orchestrator.record_provider_job(ticket.session_id, &handle.job_id);

    let started = std::time::Instant::now();
    let poll_interval = Duration::from_secs(config.poll_secs);
    let heartbeat = Duration::from_secs(config.heartbeat_secs.max(1));
    let mut last_heartbeat = std::time::Instant::now();

    loop {
        if token.is_cancelled() {
            let _ = provider.cancel_job(&handle).await;
            return Err(RunInterrupt::Cancelled);
        }
        tokio::time::sleep(poll_interval).await;
        if token.is_cancelled() {
            let _ = provider.cancel_job(&handle).await;
            return Err(RunInterrupt::Cancelled);
        }

        match provider.poll_job(&handle).await {
            Ok(SttJobState::InProgress { progress }) => {
                // Heartbeat at least every `heartbeat` interval; vendor
                // progress wins over the elapsed-time estimate.
                if last_heartbeat.elapsed() >= heartbeat || progress.is_some() {
                    let pct = progress.unwrap_or_else(|| {
                        estimate_progress(
                            started.elapsed().as_secs() as i64,
                            ticket.estimated_audio_seconds,
                        )
                    });
                    let _ = orchestrator.report_progress(ticket.session_id, pct);
                    last_heartbeat = std::time::Instant::now();
                }
            }
            Ok(SttJobState::Completed) => {
                let result = provider
                    .fetch_result(&handle)
                    .await
                    .map_err(RunInterrupt::Error)?;
                return Ok(result);
            }
            Ok(SttJobState::Failed { message }) => {
                return Err(RunInterrupt::Error(Error::Provider {
                    provider: ticket.vendor.to_string(),
                    message,
                }));
            }
            Err(e) => return Err(RunInterrupt::Error(e)),
        }
    }
}
