//! Report persistence: SQLite rows and JSON artifacts.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use taskrelay_core::{RelayError, Result};

use crate::alert::{Alert, AlertSink};
use crate::report::CadenceRunReport;

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, report: &CadenceRunReport) -> Result<()>;
}

/// Stored alert row.
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: String,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub tier: String,
    pub created_at: String,
    pub resolved: bool,
}

/// SQLite-backed store for cadence reports and system alerts.
pub struct CadenceDb {
    conn: Mutex<rusqlite::Connection>,
}

impl CadenceDb {
    /// Open or create the cadence database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| RelayError::Database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| RelayError::Database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS operational_cadence_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                tier TEXT NOT NULL,            -- 'daily', 'weekly', 'monthly'
                summary TEXT NOT NULL,         -- JSON: {total, completed, failed, duration_ms}
                report TEXT NOT NULL           -- JSON: full run report
            );
            CREATE INDEX IF NOT EXISTS idx_cadence_tier_ts
                ON operational_cadence_results (tier, timestamp);

            CREATE TABLE IF NOT EXISTS system_alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                tier TEXT NOT NULL,
                unit TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| RelayError::Database(format!("Migration: {e}")))
    }

    pub fn insert_report(&self, report: &CadenceRunReport) -> Result<i64> {
        let summary = serde_json::to_string(&report.summary)?;
        let body = serde_json::to_string(report)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO operational_cadence_results (timestamp, tier, summary, report) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![report.timestamp.to_rfc3339(), report.tier.as_str(), summary, body],
        )
        .map_err(|e| RelayError::Database(format!("Insert report: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO system_alerts (id, alert_type, severity, message, details, tier, unit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    alert.id,
                    alert.kind.as_str(),
                    alert.severity.as_str(),
                    alert.message,
                    alert.details.to_string(),
                    alert.tier.as_str(),
                    alert.unit,
                    alert.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| RelayError::Database(format!("Insert alert: {e}")))?;
        Ok(())
    }

    /// Unresolved alerts, newest first.
    pub fn open_alerts(&self) -> Result<Vec<AlertRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, alert_type, severity, message, tier, created_at, resolved
                 FROM system_alerts WHERE resolved = 0 ORDER BY created_at DESC",
            )
            .map_err(|e| RelayError::Database(format!("Query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AlertRow {
                    id: row.get(0)?,
                    alert_type: row.get(1)?,
                    severity: row.get(2)?,
                    message: row.get(3)?,
                    tier: row.get(4)?,
                    created_at: row.get(5)?,
                    resolved: row.get::<_, i64>(6)? != 0,
                })
            })
            .map_err(|e| RelayError::Database(format!("Query: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Database(format!("Row: {e}")))
    }
}

#[async_trait]
impl ReportStore for CadenceDb {
    async fn save(&self, report: &CadenceRunReport) -> Result<()> {
        let id = self.insert_report(report)?;
        tracing::debug!("💾 Cadence report {} stored (row {})", report.tier, id);
        Ok(())
    }
}

#[async_trait]
impl AlertSink for CadenceDb {
    async fn raise(&self, alert: &Alert) -> Result<()> {
        self.insert_alert(alert)
    }
}

/// Writes each report as a pretty-printed JSON file.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &CadenceRunReport) -> PathBuf {
        self.dir.join(report.artifact_name())
    }
}

#[async_trait]
impl ReportStore for ArtifactStore {
    async fn save(&self, report: &CadenceRunReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(report);
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, json).await?;
        tracing::info!("📄 Report artifact written: {}", path.display());
        Ok(())
    }
}
