//! Built-in maintenance units and the per-tier catalog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, bail};
use async_trait::async_trait;
use taskrelay_core::config::{CadenceConfig, expand_path};

use crate::report::CadenceTier;
use crate::unit::MaintenanceUnit;

const ARTIFACT_PREFIX: &str = "operational-cadence-";

/// Deletes report artifacts older than the retention period.
pub struct TtlCleanupUnit {
    artifacts_dir: PathBuf,
    retention: Duration,
}

impl TtlCleanupUnit {
    pub fn new(artifacts_dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            retention,
        }
    }
}

#[async_trait]
impl MaintenanceUnit for TtlCleanupUnit {
    fn name(&self) -> &str {
        "ttl_cleanup"
    }

    async fn execute(&self) -> anyhow::Result<serde_json::Value> {
        if !self.artifacts_dir.exists() {
            return Ok(serde_json::json!({ "artifacts_scanned": 0, "artifacts_deleted": 0 }));
        }
        let now = SystemTime::now();
        let mut scanned = 0u64;
        let mut deleted = 0u64;

        let mut entries = tokio::fs::read_dir(&self.artifacts_dir)
            .await
            .with_context(|| format!("reading {}", self.artifacts_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !name.starts_with(ARTIFACT_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            scanned += 1;
            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.retention {
                tokio::fs::remove_file(entry.path())
                    .await
                    .with_context(|| format!("deleting {}", name))?;
                deleted += 1;
            }
        }

        tracing::info!("🧹 TTL cleanup: {} of {} artifacts deleted", deleted, scanned);
        Ok(serde_json::json!({ "artifacts_scanned": scanned, "artifacts_deleted": deleted }))
    }
}

/// Age of the newest file in the backup directory.
pub struct BackupFreshnessUnit {
    backup_dir: Option<PathBuf>,
    max_age: Duration,
}

impl BackupFreshnessUnit {
    pub fn new(backup_dir: Option<PathBuf>, max_age: Duration) -> Self {
        Self { backup_dir, max_age }
    }
}

async fn newest_file(dir: &Path) -> anyhow::Result<Option<(PathBuf, SystemTime, u64)>> {
    let mut newest: Option<(PathBuf, SystemTime, u64)> = None;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if newest.as_ref().is_none_or(|(_, t, _)| modified > *t) {
            newest = Some((entry.path(), modified, meta.len()));
        }
    }
    Ok(newest)
}

#[async_trait]
impl MaintenanceUnit for BackupFreshnessUnit {
    fn name(&self) -> &str {
        "backup_freshness_check"
    }

    async fn execute(&self) -> anyhow::Result<serde_json::Value> {
        let Some(dir) = &self.backup_dir else {
            bail!("no backup directory configured");
        };
        let Some((path, modified, size)) = newest_file(dir).await? else {
            bail!("no backup found in {}", dir.display());
        };

        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        let is_fresh = age <= self.max_age;
        if !is_fresh {
            tracing::warn!("⚠️ Newest backup {} is {}h old", path.display(), age.as_secs() / 3600);
        }
        Ok(serde_json::json!({
            "backup_path": path.display().to_string(),
            "backup_age_secs": age.as_secs(),
            "backup_size": size,
            "is_fresh": is_fresh,
        }))
    }
}

/// Runs a shell command; stdout (JSON) becomes the details.
pub struct CommandUnit {
    name: String,
    command: Option<String>,
}

impl CommandUnit {
    pub fn new(name: &str, command: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            command,
        }
    }
}

#[async_trait]
impl MaintenanceUnit for CommandUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> anyhow::Result<serde_json::Value> {
        let Some(command) = &self.command else {
            bail!("no command configured");
        };

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawning `{}`", command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("command exited with {}: {}", output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(serde_json::json!({}));
        }
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| serde_json::json!({ "output": stdout })))
    }
}

/// Units for each tier, in run order.
#[derive(Default, Clone)]
pub struct UnitCatalog {
    tiers: HashMap<CadenceTier, Vec<Arc<dyn MaintenanceUnit>>>,
}

impl UnitCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: CadenceTier, units: Vec<Arc<dyn MaintenanceUnit>>) -> Self {
        self.tiers.insert(tier, units);
        self
    }

    pub fn units(&self, tier: CadenceTier) -> &[Arc<dyn MaintenanceUnit>] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Standard catalog: built-in units where they exist, configured commands for the rest.
    pub fn from_config(config: &CadenceConfig) -> Self {
        let mut catalog = Self::new();
        for tier in CadenceTier::ALL {
            let units = tier
                .unit_names()
                .iter()
                .map(|name| builtin_unit(name, config))
                .collect();
            catalog = catalog.with_tier(tier, units);
        }
        catalog
    }
}

fn builtin_unit(name: &str, config: &CadenceConfig) -> Arc<dyn MaintenanceUnit> {
    match name {
        "ttl_cleanup" => Arc::new(TtlCleanupUnit::new(
            expand_path(&config.artifacts_dir),
            Duration::from_secs(config.artifact_retention_days * 86_400),
        )),
        "backup_freshness_check" => Arc::new(BackupFreshnessUnit::new(
            config.backup_dir.as_deref().map(expand_path),
            config.backup_max_age(),
        )),
        other => Arc::new(CommandUnit::new(other, config.commands.get(other).cloned())),
    }
}
