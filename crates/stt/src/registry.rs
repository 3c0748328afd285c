//! STT provider registry.
//!
//! Constructs and holds the configured adapters. At startup the registry
//! reads the [`SttConfig`], resolves credentials from the environment, and
//! instantiates each adapter. An adapter whose credentials are missing is
//! logged and skipped rather than aborting startup; dispatching to it later
//! fails with a typed error.

use std::collections::HashMap;
use std::sync::Arc;

use cs_domain::config::SttConfig;
use cs_domain::error::{Error, Result};
use cs_domain::session::{SttSelector, SttVendor};

use crate::assemblyai::AssemblyAiProvider;
use crate::google::GoogleSttProvider;
use crate::traits::SttProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SttRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the instantiated STT adapters and the `auto` resolution rule.
pub struct SttRegistry {
    providers: HashMap<SttVendor, Arc<dyn SttProvider>>,
    default_vendor: SttVendor,
    /// Vendors that failed to initialize, with their (secret-free) errors.
    init_errors: Vec<(SttVendor, String)>,
}

impl SttRegistry {
    /// Build the registry from the STT config section. Credentials are
    /// resolved eagerly; a vendor with missing credentials is skipped.
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        let default_vendor: SttVendor = cfg.default_vendor.parse()?;

        let mut providers: HashMap<SttVendor, Arc<dyn SttProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        match GoogleSttProvider::from_config(cfg) {
            Ok(p) => {
                providers.insert(SttVendor::Google, Arc::new(p));
            }
            Err(e) => {
                tracing::warn!(vendor = "google", error = %e, "STT adapter skipped");
                init_errors.push((SttVendor::Google, e.to_string()));
            }
        }
        match AssemblyAiProvider::from_config(cfg) {
            Ok(p) => {
                providers.insert(SttVendor::Assemblyai, Arc::new(p));
            }
            Err(e) => {
                tracing::warn!(vendor = "assemblyai", error = %e, "STT adapter skipped");
                init_errors.push((SttVendor::Assemblyai, e.to_string()));
            }
        }

        if providers.is_empty() {
            tracing::warn!(
                "no STT adapters initialized; transcription dispatch will fail until credentials are configured"
            );
        }

        Ok(Self {
            providers,
            default_vendor,
            init_errors,
        })
    }

    /// Test-only constructor taking ready-made providers.
    pub fn with_providers(
        providers: Vec<Arc<dyn SttProvider>>,
        default_vendor: SttVendor,
    ) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.vendor(), p)).collect(),
            default_vendor,
            init_errors: Vec::new(),
        }
    }

    /// Resolve a user preference to a concrete vendor. The resolution for
    /// `auto` is recorded on the session by the orchestrator so retries
    /// stay sticky even if the default changes.
    pub fn resolve(&self, selector: SttSelector) -> SttVendor {
        match selector {
            SttSelector::Auto => self.default_vendor,
            SttSelector::Google => SttVendor::Google,
            SttSelector::Assemblyai => SttVendor::Assemblyai,
        }
    }

    /// Look up the adapter for a vendor.
    pub fn get(&self, vendor: SttVendor) -> Result<Arc<dyn SttProvider>> {
        self.providers.get(&vendor).cloned().ok_or_else(|| {
            Error::Config(format!("STT vendor {vendor} is not configured"))
        })
    }

    /// Vendors that are ready to accept jobs.
    pub fn available(&self) -> Vec<SttVendor> {
        let mut v: Vec<_> = self.providers.keys().copied().collect();
        v.sort_by_key(|v| v.as_str());
        v
    }

    /// Initialization failures for readiness reporting.
    pub fn init_errors(&self) -> &[(SttVendor, String)] {
        &self.init_errors
    }
}
