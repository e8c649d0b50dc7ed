//! TaskRelay configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::registry::WorkerRegistry;
use crate::types::WorkerDescriptor;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    /// Static worker registry. Empty = one default worker per category.
    #[serde(default)]
    pub workers: Vec<WorkerDescriptor>,
}

impl RelayConfig {
    /// Env var that overrides the default config path.
    pub const ENV_PATH: &'static str = "TASKRELAY_CONFIG";

    /// Load from an explicit path, else `$TASKRELAY_CONFIG`, else the default path.
    /// A missing implicit file yields the defaults; a missing explicit one is an error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) if !p.exists() => {
                return Err(RelayError::Config(format!("config file not found: {}", p.display())));
            }
            Some(p) => p.to_path_buf(),
            None => std::env::var(Self::ENV_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::default_path()),
        };
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loops and gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("sink.timeout_secs", self.sink.timeout_secs),
            ("cycle.dispatch_interval_ms", self.cycle.dispatch_interval_ms),
            ("cycle.health_interval_secs", self.cycle.health_interval_secs),
            ("cycle.heartbeat_interval_secs", self.cycle.heartbeat_interval_secs),
            ("admission.window_secs", self.admission.window_secs),
            ("admission.idempotency_ttl_secs", self.admission.idempotency_ttl_secs),
            ("cadence.unit_timeout_secs", self.cadence.unit_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RelayError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.admission.rate_limit == 0 {
            return Err(RelayError::Config("admission.rate_limit must be at least 1".into()));
        }
        if self.sink.url.trim().is_empty() {
            return Err(RelayError::Config("sink.url must not be empty".into()));
        }
        // Duplicate or empty worker ids
        self.registry().map(|_| ())
    }

    /// Build the worker registry this config describes.
    pub fn registry(&self) -> Result<WorkerRegistry> {
        if self.workers.is_empty() {
            Ok(WorkerRegistry::with_defaults())
        } else {
            WorkerRegistry::new(self.workers.clone())
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TaskRelay home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskrelay")
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Downstream sink that receives delivered tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// HMAC-SHA256 secret for `X-Signature-256`. No signature when unset.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

fn default_sink_url() -> String { "http://127.0.0.1:5678/webhook/tasks".into() }
fn default_timeout_secs() -> u64 { 10 }
fn default_max_retries() -> u32 { 5 }
fn default_retry_delay_ms() -> u64 { 3000 }
fn default_protocol_version() -> String { "1.0".into() }
fn default_user_agent() -> String { format!("taskrelay/{}", env!("CARGO_PKG_VERSION")) }

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            protocol_version: default_protocol_version(),
            user_agent: default_user_agent(),
            signing_secret: None,
        }
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Timing of the three periodic loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_worker_stagger_ms")]
    pub worker_stagger_ms: u64,
    /// Consecutive all-failed dispatch cycles before an escalation is emitted.
    #[serde(default = "default_escalate_after")]
    pub escalate_after_failed_cycles: u32,
}

fn default_dispatch_interval_ms() -> u64 { 5000 }
fn default_health_interval_secs() -> u64 { 120 }
fn default_heartbeat_interval_secs() -> u64 { 15 }
fn default_worker_stagger_ms() -> u64 { 100 }
fn default_escalate_after() -> u32 { 12 }

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            health_interval_secs: default_health_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            worker_stagger_ms: default_worker_stagger_ms(),
            escalate_after_failed_cycles: default_escalate_after(),
        }
    }
}

impl CycleConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn worker_stagger(&self) -> Duration {
        Duration::from_millis(self.worker_stagger_ms)
    }
}

/// Inbound admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Accepted requests per client per window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_window_secs")]
    pub idempotency_ttl_secs: u64,
}

fn default_rate_limit() -> u32 { 100 }
fn default_window_secs() -> u64 { 60 }

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            window_secs: default_window_secs(),
            idempotency_ttl_secs: default_window_secs(),
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

/// HTTP listener for the admission gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Peers allowed to name the client via `X-Client-Id` / `X-Forwarded-For`.
    /// Everyone else is rate-limited by their socket address.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8787 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trusted_proxies: Vec::new(),
        }
    }
}

/// Maintenance cadence: where reports go and what counts as a breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Directory holding backups; the newest file's mtime is the backup age.
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default = "default_backup_max_age_hours")]
    pub backup_max_age_hours: u64,
    #[serde(default = "default_artifact_retention_days")]
    pub artifact_retention_days: u64,
    #[serde(default = "default_budget_drift_threshold_pct")]
    pub budget_drift_threshold_pct: f64,
    #[serde(default = "default_canary_min_success_rate")]
    pub canary_min_success_rate: f64,
    /// A unit still running after this long is recorded as failed.
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
    /// unit name → shell command printing JSON details on stdout.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

fn default_artifacts_dir() -> String { "~/.taskrelay/artifacts/operational-cadence".into() }
fn default_db_path() -> String { "~/.taskrelay/cadence.db".into() }
fn default_backup_max_age_hours() -> u64 { 24 }
fn default_artifact_retention_days() -> u64 { 30 }
fn default_budget_drift_threshold_pct() -> f64 { 10.0 }
fn default_canary_min_success_rate() -> f64 { 95.0 }
fn default_unit_timeout_secs() -> u64 { 30 * 60 }

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            db_path: default_db_path(),
            backup_dir: None,
            backup_max_age_hours: default_backup_max_age_hours(),
            artifact_retention_days: default_artifact_retention_days(),
            budget_drift_threshold_pct: default_budget_drift_threshold_pct(),
            canary_min_success_rate: default_canary_min_success_rate(),
            unit_timeout_secs: default_unit_timeout_secs(),
            commands: BTreeMap::new(),
        }
    }
}

impl CadenceConfig {
    pub fn backup_max_age(&self) -> Duration {
        Duration::from_secs(self.backup_max_age_hours * 3600)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }
}

/// Operator-facing alert delivery.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_headers: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let cfg = RelayConfig::parse("").unwrap();
        assert_eq!(cfg.sink.timeout_secs, 10);
        assert_eq!(cfg.sink.max_retries, 5);
        assert_eq!(cfg.sink.retry_delay_ms, 3000);
        assert_eq!(cfg.cycle.dispatch_interval_ms, 5000);
        assert_eq!(cfg.cycle.health_interval_secs, 120);
        assert_eq!(cfg.cycle.heartbeat_interval_secs, 15);
        assert_eq!(cfg.cycle.worker_stagger_ms, 100);
        assert_eq!(cfg.admission.rate_limit, 100);
        assert_eq!(cfg.admission.window_secs, 60);
        assert_eq!(cfg.cadence.budget_drift_threshold_pct, 10.0);
        assert_eq!(cfg.cadence.unit_timeout(), Duration::from_secs(1800));
        assert!(cfg.gateway.trusted_proxies.is_empty());
        assert_eq!(cfg.registry().unwrap().len(), 10);
    }

    #[test]
    fn test_partial_sections() {
        let cfg = RelayConfig::parse(
            r#"
            [sink]
            url = "http://sink.local/tasks"
            max_retries = 2

            [[workers]]
            id = "alpha"
            category = "backend"
            priority = 2

            [[workers]]
            id = "beta"
            category = "security"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sink.url, "http://sink.local/tasks");
        assert_eq!(cfg.sink.max_retries, 2);
        assert_eq!(cfg.sink.timeout_secs, 10);
        let reg = cfg.registry().unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.workers()[1].priority, 5);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = RelayConfig::parse("[cycle]\ndispatch_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("dispatch_interval_ms"));
    }

    #[test]
    fn test_malformed_toml_is_toml_error() {
        let err = RelayConfig::parse("[sink\nurl = 1").unwrap_err();
        assert!(matches!(err, RelayError::Toml(_)));
    }

    #[test]
    fn test_trusted_proxies_parse() {
        let cfg = RelayConfig::parse("[gateway]\ntrusted_proxies = [\"10.0.0.1\", \"::1\"]\n").unwrap();
        assert_eq!(cfg.gateway.trusted_proxies.len(), 2);
        assert_eq!(cfg.gateway.trusted_proxies[0], "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        assert!(RelayConfig::parse("[admission]\nrate_limit = 0\n").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RelayConfig::resolve(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_explicit_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[sink]\nurl = \"http://sink.internal/tasks\"\nmax_retries = 2\n").unwrap();
        let cfg = RelayConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.sink.url, "http://sink.internal/tasks");
        assert_eq!(cfg.sink.max_retries, 2);
        assert_eq!(cfg.gateway.port, 8787);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 9100\n").unwrap();
        let cfg = RelayConfig::load_from(&path).unwrap();
        assert_eq!(cfg.gateway.port, 9100);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
    }
}
