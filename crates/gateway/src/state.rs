//! Shared application state passed to all API handlers.

use std::sync::Arc;

use cs_domain::config::Config;
use cs_store::ports::UserRepo;
use cs_stt::SttRegistry;

use crate::runtime::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// User directory, used by the identity extractor.
    pub users: Arc<dyn UserRepo>,
    /// The single owner of session state transitions.
    pub orchestrator: Arc<Orchestrator>,
    pub stt: Arc<SttRegistry>,
    /// SHA-256 of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
