//! SQLite-backed persistence for schedules and the job execution history.
//! Survives restarts; the execution history is append-only and never pruned
//! here (the in-memory view trims, the database keeps everything).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use seopilot_core::{
    ExecutionStatus, Frequency, JobExecution, Result, Schedule, ScheduleType, SeoPilotError,
};

pub struct SchedulerDb {
    conn: Mutex<rusqlite::Connection>,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> SeoPilotError {
    SeoPilotError::Persistence(format!("{context}: {e}"))
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| db_err("db open", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| db_err("db open", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                schedule_type TEXT NOT NULL,     -- 'audit', 'content', 'technical', 'rankings'
                frequency TEXT NOT NULL,         -- 'daily', 'weekly', 'custom'
                cron_expression TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                companies TEXT NOT NULL DEFAULT '[]',  -- JSON array of company ids
                config TEXT NOT NULL DEFAULT 'null',   -- JSON, handler-specific
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_executions (
                id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'running', 'completed', 'failed'
                started_at TEXT NOT NULL,
                completed_at TEXT,
                logs TEXT NOT NULL DEFAULT '[]', -- JSON array of lines
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_executions_job
                ON job_executions (job_name, started_at);
         ",
            )
            .map_err(|e| db_err("migration", e))?;
        Ok(())
    }

    /// Close `running` rows left over by a previous process. Returns how many
    /// were closed.
    pub fn close_interrupted(&self) -> Result<usize> {
        let n = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE job_executions
                 SET status = 'failed', error = 'interrupted by restart', completed_at = ?1
                 WHERE status = 'running'",
                [Utc::now().to_rfc3339()],
            )
            .map_err(|e| db_err("close interrupted", e))?;
        if n > 0 {
            tracing::warn!(count = n, "closed job executions interrupted by restart");
        }
        Ok(n)
    }

    // ─── Schedules ──────────────────────────────────────

    pub fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO schedules
                 (id, schedule_type, frequency, cron_expression, enabled, companies, config,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    schedule.id,
                    schedule.schedule_type.to_string(),
                    match schedule.frequency {
                        Frequency::Daily => "daily",
                        Frequency::Weekly => "weekly",
                        Frequency::Custom => "custom",
                    },
                    schedule.cron_expression,
                    schedule.enabled as i32,
                    serde_json::to_string(&schedule.companies).unwrap_or_else(|_| "[]".into()),
                    schedule.config.to_string(),
                    schedule.created_at.to_rfc3339(),
                    schedule.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| db_err("save schedule", e))?;
        Ok(())
    }

    pub fn load_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_type, frequency, cron_expression, enabled, companies,
                        config, created_at, updated_at
                 FROM schedules ORDER BY created_at",
            )
            .map_err(|e| db_err("load schedules", e))?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let type_str: String = row.get(1)?;
                let freq_str: String = row.get(2)?;
                let cron_expression: Option<String> = row.get(3)?;
                let enabled: bool = row.get::<_, i32>(4)? != 0;
                let companies_str: String = row.get(5)?;
                let config_str: String = row.get(6)?;
                let created_at: String = row.get(7)?;
                let updated_at: String = row.get(8)?;

                let schedule_type = match type_str.as_str() {
                    "content" => ScheduleType::Content,
                    "technical" => ScheduleType::Technical,
                    "rankings" => ScheduleType::Rankings,
                    _ => ScheduleType::Audit,
                };
                let frequency = match freq_str.as_str() {
                    "weekly" => Frequency::Weekly,
                    "custom" => Frequency::Custom,
                    _ => Frequency::Daily,
                };

                Ok(Schedule {
                    id,
                    schedule_type,
                    frequency,
                    cron_expression,
                    enabled,
                    companies: serde_json::from_str(&companies_str).unwrap_or_default(),
                    config: serde_json::from_str(&config_str)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: parse_ts(&created_at),
                    updated_at: parse_ts(&updated_at),
                })
            })
            .map_err(|e| db_err("load schedules", e))?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_schedule(&self, id: &str) -> Result<bool> {
        let n = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM schedules WHERE id = ?1", [id])
            .map_err(|e| db_err("delete schedule", e))?;
        Ok(n > 0)
    }

    // ─── Job executions ──────────────────────────────────────

    pub fn insert_execution(&self, exec: &JobExecution) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO job_executions
                 (id, job_name, status, started_at, completed_at, logs, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    exec.id,
                    exec.job_name,
                    status_str(exec.status),
                    exec.started_at.to_rfc3339(),
                    exec.completed_at.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&exec.logs).unwrap_or_else(|_| "[]".into()),
                    exec.error,
                ],
            )
            .map_err(|e| db_err("insert execution", e))?;
        Ok(())
    }

    pub fn update_execution(&self, exec: &JobExecution) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE job_executions
                 SET status = ?1, completed_at = ?2, logs = ?3, error = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    status_str(exec.status),
                    exec.completed_at.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&exec.logs).unwrap_or_else(|_| "[]".into()),
                    exec.error,
                    exec.id,
                ],
            )
            .map_err(|e| db_err("update execution", e))?;
        Ok(())
    }

    /// Most recent executions, newest first.
    pub fn recent_executions(&self, limit: usize) -> Result<Vec<JobExecution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, job_name, status, started_at, completed_at, logs, error
                 FROM job_executions ORDER BY started_at DESC LIMIT ?1",
            )
            .map_err(|e| db_err("recent executions", e))?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                let status_str: String = row.get(2)?;
                let started_at: String = row.get(3)?;
                let completed_at: Option<String> = row.get(4)?;
                let logs_str: String = row.get(5)?;
                Ok(JobExecution {
                    id: row.get(0)?,
                    job_name: row.get(1)?,
                    status: match status_str.as_str() {
                        "completed" => ExecutionStatus::Completed,
                        "failed" => ExecutionStatus::Failed,
                        _ => ExecutionStatus::Running,
                    },
                    started_at: parse_ts(&started_at),
                    completed_at: completed_at.as_deref().map(parse_ts),
                    logs: serde_json::from_str(&logs_str).unwrap_or_default(),
                    error: row.get(6)?,
                })
            })
            .map_err(|e| db_err("recent executions", e))?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
impl SchedulerDb {
    pub(crate) fn exec_raw(&self, sql: &str) {
        self.conn.lock().unwrap().execute_batch(sql).unwrap();
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
}
