//! Platform database: audit trail for admin actions.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::Path;

use escrowise_core::error::{EscrowiseError, Result};

/// Platform database manager.
pub struct PlatformDb {
    conn: Connection,
}

/// Audit log entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub performed_by: Option<String>,
    pub created_at: String,
}

/// Audit row counts per action and per entity type.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AuditStats {
    pub actions: BTreeMap<String, u64>,
    pub entities: BTreeMap<String, u64>,
    pub total: u64,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> EscrowiseError {
    EscrowiseError::query(format!("audit {context}"), e)
}

impl PlatformDb {
    /// Open or create the platform database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| db_err("open", e))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| db_err("pragma", e))?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS audit_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,            -- 'create', 'update', 'delete', 'run'
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                old_value TEXT,                  -- JSON snapshot before
                new_value TEXT,                  -- JSON snapshot after
                performed_by TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_logs_entity
                ON audit_logs (entity_type, entity_id);
         ",
            )
            .map_err(|e| db_err("migration", e))
    }

    /// Append an audit row.
    pub fn log_action(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        old_value: Option<&serde_json::Value>,
        new_value: Option<&serde_json::Value>,
        performed_by: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_logs
                 (action, entity_type, entity_id, old_value, new_value, performed_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    action,
                    entity_type,
                    entity_id,
                    old_value.map(|v| v.to_string()),
                    new_value.map(|v| v.to_string()),
                    performed_by,
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                ],
            )
            .map_err(|e| db_err("insert", e))?;
        Ok(())
    }

    /// Most recent entries first, optionally for one entity type.
    pub fn list_audit(&self, limit: usize, entity_type: Option<&str>) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, action, entity_type, entity_id, old_value, new_value, performed_by, created_at
                 FROM audit_logs
                 WHERE (?2 IS NULL OR entity_type = ?2)
                 ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| db_err("prepare", e))?;

        let parse = |raw: Option<String>| -> Option<serde_json::Value> {
            raw.and_then(|s| serde_json::from_str(&s).ok())
        };
        let entries = stmt
            .query_map(params![limit as i64, entity_type], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    entity_type: row.get(2)?,
                    entity_id: row.get(3)?,
                    old_value: parse(row.get(4)?),
                    new_value: parse(row.get(5)?),
                    performed_by: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(|e| db_err("query", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("query", e))?;
        Ok(entries)
    }

    /// Counts grouped by `action` and by `entity_type`.
    pub fn audit_stats(&self) -> Result<AuditStats> {
        let mut stats = AuditStats {
            actions: self.count_by("action")?,
            entities: self.count_by("entity_type")?,
            ..AuditStats::default()
        };
        stats.total = stats.actions.values().sum();
        Ok(stats)
    }

    fn count_by(&self, column: &'static str) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {column}, COUNT(*) FROM audit_logs GROUP BY {column}"
            ))
            .map_err(|e| db_err("prepare", e))?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(|e| db_err("stats", e))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(|e| db_err("stats", e))?;
        Ok(counts)
    }
}
