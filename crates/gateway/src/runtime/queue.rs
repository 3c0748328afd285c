//! The queue joining the request tier to the worker tier.
//!
//! The request tier never blocks on STT: `StartTranscription` transitions
//! the session and enqueues a [`JobTicket`]; workers drain the queue and
//! run the provider interaction to completion. The trait keeps the broker
//! swappable — the in-process implementation below is bounded-channel
//! based, with the orchestrator's compare-and-set providing idempotence
//! if a ticket is ever delivered twice, and the reaper restoring runs
//! whose ticket was lost with its worker.

use tokio::sync::mpsc;
use uuid::Uuid;

use cs_domain::error::{Error, Result};
use cs_domain::session::SttVendor;

/// Everything a worker needs to run one transcription job.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub session_id: Uuid,
    pub vendor: SttVendor,
    pub blob_uri: String,
    pub language: String,
    /// Audio length estimate (from the object size) used for progress
    /// estimation until the vendor reports real numbers.
    pub estimated_audio_seconds: u32,
}

pub trait JobQueue: Send + Sync {
    /// Hand a ticket to the worker tier without blocking.
    fn enqueue(&self, ticket: JobTicket) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded in-process queue.
pub struct MemoryJobQueue {
    tx: mpsc::Sender<JobTicket>,
}

impl MemoryJobQueue {
    /// Returns the queue and the receiving end the worker pool consumes.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<JobTicket>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, ticket: JobTicket) -> Result<()> {
        self.tx.try_send(ticket).map_err(|e| match e {
            mpsc::error::TrySendError::Full(t) => Error::Other(format!(
                "job queue full, session {} not dispatched",
                t.session_id
            )),
            mpsc::error::TrySendError::Closed(_) => {
                Error::Other("job queue closed".into())
            }
        })
    }
}
