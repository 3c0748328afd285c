//! Configuration tree.
//!
//! Deserialised from a TOML file with env-var overrides for secrets. Every
//! section has serde defaults so a minimal config file (or none at all)
//! boots a working dev instance backed by the in-memory stores.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::user::UserPlan;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    /// Per-plan limit overrides (key = plan name, e.g. `"pro"`).
    #[serde(default)]
    pub plans: HashMap<String, PlanOverride>,
    /// Accounts seeded into the in-memory user store at startup.
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
    /// Env var holding the API bearer token. Unset/empty = dev mode.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            api_token_env: d_token_env(),
            cors_origins: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blob storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the local blob store.
    #[serde(default = "d_blob_root")]
    pub blob_root: PathBuf,
    /// Upload URL validity window, seconds.
    #[serde(default = "d_3600")]
    pub upload_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: d_blob_root(),
            upload_url_ttl_secs: d_3600(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Vendor `auto` resolves to: `"google"` or `"assemblyai"`.
    #[serde(default = "d_default_vendor")]
    pub default_vendor: String,
    /// Per-upstream-call timeout, seconds.
    #[serde(default = "d_30")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub google: GoogleSttConfig,
    #[serde(default)]
    pub assemblyai: AssemblyAiConfig,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            default_vendor: d_default_vendor(),
            call_timeout_secs: d_30(),
            google: GoogleSttConfig::default(),
            assemblyai: AssemblyAiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSttConfig {
    #[serde(default = "d_google_url")]
    pub base_url: String,
    #[serde(default = "d_google_key_env")]
    pub api_key_env: String,
}

impl Default for GoogleSttConfig {
    fn default() -> Self {
        Self {
            base_url: d_google_url(),
            api_key_env: d_google_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyAiConfig {
    #[serde(default = "d_aai_url")]
    pub base_url: String,
    #[serde(default = "d_aai_key_env")]
    pub api_key_env: String,
}

impl Default for AssemblyAiConfig {
    fn default() -> Self {
        Self {
            base_url: d_aai_url(),
            api_key_env: d_aai_key_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker & reaper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Progress heartbeat interval while an upstream job is open, seconds.
    #[serde(default = "d_30")]
    pub heartbeat_secs: u64,
    /// Upstream poll interval, seconds.
    #[serde(default = "d_5")]
    pub poll_secs: u64,
    /// Attempts per run for transient upstream failures.
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    /// First backoff sleep, seconds. Doubles per attempt.
    #[serde(default = "d_5")]
    pub backoff_initial_secs: u64,
    /// Backoff ceiling, seconds.
    #[serde(default = "d_120")]
    pub backoff_cap_secs: u64,
    /// Bounded queue depth between the request tier and the workers.
    #[serde(default = "d_256")]
    pub queue_capacity: usize,
    /// Concurrent worker runs.
    #[serde(default = "d_4")]
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: d_30(),
            poll_secs: d_5(),
            max_attempts: d_3(),
            backoff_initial_secs: d_5(),
            backoff_cap_secs: d_120(),
            queue_capacity: d_256(),
            concurrency: d_4(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Sweep interval, seconds.
    #[serde(default = "d_60")]
    pub tick_secs: u64,
    /// A PROCESSING session older than `multiplier × estimated run time`
    /// (but at least `minimum_secs`) is restored to FAILED / WORKER_LOST.
    #[serde(default = "d_2f")]
    pub timeout_multiplier: f64,
    #[serde(default = "d_1800")]
    pub minimum_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_secs: d_60(),
            timeout_multiplier: d_2f(),
            minimum_secs: d_1800(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Billing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Cents per transcribed minute, by vendor.
    #[serde(default = "d_rate_google")]
    pub google_rate_cents: u32,
    #[serde(default = "d_rate_aai")]
    pub assemblyai_rate_cents: u32,
    #[serde(default = "d_currency")]
    pub currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            google_rate_cents: d_rate_google(),
            assemblyai_rate_cents: d_rate_aai(),
            currency: d_currency(),
        }
    }
}

/// Partial per-plan limit override; unset fields keep the built-in value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanOverride {
    pub max_minutes: Option<i64>,
    pub max_file_size_mb: Option<u32>,
    pub max_exports_per_month: Option<i64>,
    pub export_formats: Option<Vec<String>>,
    pub concurrent_processing: Option<u32>,
    pub retention_days: Option<u32>,
}

/// Account seeded at startup (dev composition; production wires a real
/// user directory instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub email: String,
    pub plan: UserPlan,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !matches!(self.stt.default_vendor.as_str(), "google" | "assemblyai") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "stt.default_vendor must be \"google\" or \"assemblyai\", got {:?}",
                    self.stt.default_vendor
                ),
            });
        }
        if self.worker.max_attempts == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "worker.max_attempts must be at least 1".into(),
            });
        }
        if self.worker.backoff_cap_secs < self.worker.backoff_initial_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "worker.backoff_cap_secs must be >= backoff_initial_secs".into(),
            });
        }
        if self.worker.concurrency == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "worker.concurrency must be at least 1".into(),
            });
        }
        if self.reaper.timeout_multiplier < 1.0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "reaper.timeout_multiplier {} will reap runs faster than they are expected to finish",
                    self.reaper.timeout_multiplier
                ),
            });
        }
        for plan in self.plans.keys() {
            if parse_plan(plan).is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("plans.{plan}: unknown plan name"),
                });
            }
        }
        if std::env::var(&self.server.api_token_env)
            .map(|v| v.is_empty())
            .unwrap_or(true)
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "{} is unset; the API will accept unauthenticated requests (dev mode)",
                    self.server.api_token_env
                ),
            });
        }
        issues
    }
}

pub fn parse_plan(name: &str) -> Option<UserPlan> {
    match name {
        "free" => Some(UserPlan::Free),
        "student" => Some(UserPlan::Student),
        "pro" => Some(UserPlan::Pro),
        "enterprise" => Some(UserPlan::Enterprise),
        "coaching_school" => Some(UserPlan::CoachingSchool),
        _ => None,
    }
}

// ── Serde default helpers ────────────────────────────────────────────

fn d_bind() -> String {
    "127.0.0.1:8087".into()
}
fn d_token_env() -> String {
    "CS_API_TOKEN".into()
}
fn d_blob_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn d_default_vendor() -> String {
    "google".into()
}
fn d_google_url() -> String {
    "https://speech.googleapis.com".into()
}
fn d_google_key_env() -> String {
    "CS_GOOGLE_STT_KEY".into()
}
fn d_aai_url() -> String {
    "https://api.assemblyai.com".into()
}
fn d_aai_key_env() -> String {
    "CS_ASSEMBLYAI_KEY".into()
}
fn d_currency() -> String {
    "TWD".into()
}
fn d_rate_google() -> u32 {
    3
}
fn d_rate_aai() -> u32 {
    2
}
fn d_2f() -> f64 {
    2.0
}
fn d_3() -> u32 {
    3
}
fn d_4() -> usize {
    4
}
fn d_5() -> u64 {
    5
}
fn d_30() -> u64 {
    30
}
fn d_60() -> u64 {
    60
}
fn d_120() -> u64 {
    120
}
fn d_256() -> usize {
    256
}
fn d_1800() -> u64 {
    1800
}
fn d_3600() -> u64 {
    3600
}
