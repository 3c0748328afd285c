//! Composition root.
//!
//! Wires the ports into use-case objects once per process: stores, blob
//! gateway, quota evaluator, usage ledger, STT registry, orchestrator,
//! worker pool, and reaper. Everything downstream receives its narrow
//! dependencies by constructor — no ambient state.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use cs_billing::{PlanTable, QuotaService, UsageLedger};
use cs_domain::config::Config;
use cs_domain::user::User;
use cs_store::ports::UserRepo;
use cs_store::{LocalBlobStore, MemoryStore};
use cs_stt::SttRegistry;

use crate::runtime::{reaper, worker, CancelMap, MemoryJobQueue, Orchestrator};
use crate::state::AppState;

/// The assembled process: shared state plus the background task handles.
pub struct Runtime {
    pub state: AppState,
    pub worker: JoinHandle<()>,
    pub reaper: JoinHandle<()>,
}

pub fn build(config: Arc<Config>) -> anyhow::Result<Runtime> {
    let store = Arc::new(MemoryStore::new());
    seed_users(store.as_ref(), &config)?;

    let blobs = Arc::new(LocalBlobStore::new(config.storage.blob_root.clone())?);
    tracing::info!(root = %blobs.root().display(), "blob store ready");

    let (queue, queue_rx) = MemoryJobQueue::new(config.worker.queue_capacity);
    let stt = Arc::new(SttRegistry::from_config(&config.stt)?);
    tracing::info!(providers = ?stt.available(), "STT registry ready");

    let quota = Arc::new(QuotaService::new(
        store.clone(),
        PlanTable::from_overrides(&config.plans),
    ));
    let ledger = Arc::new(UsageLedger::new(store.clone(), config.billing.clone()));
    let cancels = Arc::new(CancelMap::new());

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        quota,
        ledger,
        stt.clone(),
        blobs,
        Arc::new(queue),
        cancels.clone(),
        config.clone(),
    ));

    let worker_handle = worker::spawn(
        orchestrator.clone(),
        stt.clone(),
        cancels,
        config.worker.clone(),
        queue_rx,
    );
    let reaper_handle = reaper::spawn(orchestrator.clone(), store.clone(), config.reaper.clone());

    let state = AppState {
        api_token_hash: read_api_token_hash(&config),
        config,
        users: store,
        orchestrator,
        stt,
    };
    Ok(Runtime {
        state,
        worker: worker_handle,
        reaper: reaper_handle,
    })
}

fn seed_users(store: &MemoryStore, config: &Config) -> anyhow::Result<()> {
    for seed in &config.users {
        let user = User::new(seed.email.clone(), seed.plan);
        UserRepo::save(store, &user)?;
        tracing::info!(email = %seed.email, plan = seed.plan.as_str(), "seeded user");
    }
    Ok(())
}

fn read_api_token_hash(config: &Config) -> Option<Vec<u8>> {
    match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!(
                env = %config.server.api_token_env,
                "no API token configured; requests are not authenticated (dev mode)"
            );
            None
        }
    }
}
