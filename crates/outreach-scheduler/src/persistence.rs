//! SQLite-backed persistence for cadences, steps, enrolled leads, step
//! instances, schedules and the activity log.
//!
//! The only concurrency primitive is [`CadenceDb::claim`]: a conditional
//! `UPDATE ... WHERE status = 'scheduled'`. Every invocation of the engine may
//! open its own connection; nothing relies on in-process locks for correctness.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{ActivityEntry, ActivityLogger};
use outreach_core::{
    AutomationMode, Cadence, CadenceLead, CadenceStatus, CadenceStep, InstanceStatus, LeadStatus,
    LeadStepInstance, Schedule, ScheduleStatus, StepConfig, StepType,
};

/// Store handle. One connection, serialized behind a mutex.
pub struct CadenceDb {
    conn: Mutex<Connection>,
}

/// Persisted activity log row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub owner_id: String,
    pub cadence_id: String,
    pub step_id: Option<String>,
    pub lead_id: String,
    pub action: String,
    pub status: String,
    pub details: serde_json::Value,
    pub created_at: String,
}

/// Canonical timestamp encoding. Fixed width, so text order is time order.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn store_err(ctx: &str) -> impl Fn(rusqlite::Error) -> OutreachError + '_ {
    move |e| OutreachError::Store(format!("{ctx}: {e}"))
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, format!("bad timestamp '{raw}': {e}")))
}

const SCHEDULE_COLUMNS: &str = "id, cadence_id, cadence_step_id, lead_id, owner_id, scheduled_at, \
     timezone, status, last_error, message_template_text, message_rendered_text";

const STEP_COLUMNS: &str =
    "id, cadence_id, step_type, step_label, day_offset, order_in_day, config_json";

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let scheduled_at: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(Schedule {
        id: row.get(0)?,
        cadence_id: row.get(1)?,
        cadence_step_id: row.get(2)?,
        lead_id: row.get(3)?,
        owner_id: row.get(4)?,
        scheduled_at: parse_ts(5, &scheduled_at)?,
        timezone: row.get(6)?,
        status: ScheduleStatus::parse(&status)
            .ok_or_else(|| conversion_err(7, format!("unknown schedule status '{status}'")))?,
        last_error: row.get(8)?,
        message_template_text: row.get(9)?,
        message_rendered_text: row.get(10)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<CadenceStep> {
    let step_type = StepType::parse(&row.get::<_, String>(2)?);
    let raw_config: Option<String> = row.get(6)?;
    let config_json = raw_config
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(CadenceStep {
        id: row.get(0)?,
        cadence_id: row.get(1)?,
        config: StepConfig::from_json(&step_type, &config_json),
        step_type,
        step_label: row.get(3)?,
        day_offset: row.get(4)?,
        order_in_day: row.get(5)?,
    })
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<CadenceLead> {
    let status: String = row.get(3)?;
    Ok(CadenceLead {
        cadence_id: row.get(0)?,
        lead_id: row.get(1)?,
        current_step_id: row.get(2)?,
        status: LeadStatus::parse(&status)
            .ok_or_else(|| conversion_err(3, format!("unknown lead status '{status}'")))?,
    })
}

impl CadenceDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path).map_err(store_err("DB open"))?;
        conn.busy_timeout(busy_timeout)
            .map_err(store_err("Busy timeout"))?;
        // WAL lets concurrent invocations read while one writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Private in-memory database, for tests and dry tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err("DB open"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OutreachError::Store(format!("Lock: {e}")))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?
            .execute_batch(sql)
            .map_err(store_err("Execute"))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cadences (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                owner_id TEXT NOT NULL,
                automation_mode TEXT NOT NULL DEFAULT 'manual',
                timezone TEXT NOT NULL DEFAULT 'UTC',
                status TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cadence_steps (
                id TEXT PRIMARY KEY,
                cadence_id TEXT NOT NULL,
                step_type TEXT NOT NULL,
                step_label TEXT NOT NULL DEFAULT '',
                day_offset INTEGER NOT NULL DEFAULT 0,
                order_in_day INTEGER NOT NULL DEFAULT 0,
                config_json TEXT NOT NULL DEFAULT '{}',
                UNIQUE (cadence_id, day_offset, order_in_day)
            );

            CREATE TABLE IF NOT EXISTS cadence_leads (
                cadence_id TEXT NOT NULL,
                lead_id TEXT NOT NULL,
                current_step_id TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                updated_at TEXT NOT NULL,
                PRIMARY KEY (cadence_id, lead_id)
            );

            CREATE TABLE IF NOT EXISTS lead_step_instances (
                cadence_step_id TEXT NOT NULL,
                lead_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                message_rendered_text TEXT,
                last_error TEXT,
                result_snapshot TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (cadence_step_id, lead_id)
            );

            -- No uniqueness on (cadence_step_id, lead_id): terminal rows are kept for audit.
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                cadence_id TEXT NOT NULL,
                cadence_step_id TEXT NOT NULL,
                lead_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                status TEXT NOT NULL DEFAULT 'scheduled',
                last_error TEXT,
                message_template_text TEXT,
                message_rendered_text TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_schedules_pair ON schedules (cadence_step_id, lead_id);

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                cadence_id TEXT NOT NULL,
                step_id TEXT,
                lead_id TEXT NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            ",
        )
        .map_err(store_err("Migration"))?;
        Ok(())
    }

    // ─── Cadences ─────────────────────────────────────────────

    pub fn upsert_cadence(&self, cadence: &Cadence) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO cadences (id, name, owner_id, automation_mode, timezone, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   owner_id = excluded.owner_id,
                   automation_mode = excluded.automation_mode,
                   timezone = excluded.timezone,
                   status = excluded.status",
                params![
                    cadence.id,
                    cadence.name,
                    cadence.owner_id,
                    cadence.automation_mode.as_str(),
                    cadence.timezone,
                    cadence.status.as_str(),
                    ts(Utc::now()),
                ],
            )
            .map_err(store_err("Save cadence"))?;
        Ok(())
    }

    pub fn get_cadence(&self, id: &str) -> Result<Cadence> {
        self.conn()?
            .query_row(
                "SELECT id, name, owner_id, automation_mode, timezone, status FROM cadences WHERE id = ?1",
                params![id],
                |row| {
                    let mode: String = row.get(3)?;
                    let status: String = row.get(5)?;
                    Ok(Cadence {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        owner_id: row.get(2)?,
                        automation_mode: AutomationMode::parse(&mode),
                        timezone: row.get(4)?,
                        status: CadenceStatus::parse(&status).unwrap_or(CadenceStatus::Draft),
                    })
                },
            )
            .optional()
            .map_err(store_err("Get cadence"))?
            .ok_or_else(|| OutreachError::NotFound(format!("cadence {id}")))
    }

    pub fn set_cadence_status(&self, id: &str, status: CadenceStatus) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE cadences SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )
            .map_err(store_err("Set cadence status"))?;
        Ok(())
    }

    // ─── Steps ────────────────────────────────────────────────

    pub fn upsert_step(&self, step: &CadenceStep) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO cadence_steps (id, cadence_id, step_type, step_label, day_offset, order_in_day, config_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   step_type = excluded.step_type,
                   step_label = excluded.step_label,
                   day_offset = excluded.day_offset,
                   order_in_day = excluded.order_in_day,
                   config_json = excluded.config_json",
                params![
                    step.id,
                    step.cadence_id,
                    step.step_type.as_str(),
                    step.step_label,
                    step.day_offset,
                    step.order_in_day,
                    step.config.to_json().to_string(),
                ],
            )
            .map_err(store_err("Save step"))?;
        Ok(())
    }

    pub fn get_step(&self, id: &str) -> Result<Option<CadenceStep>> {
        self.conn()?
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM cadence_steps WHERE id = ?1"),
                params![id],
                step_from_row,
            )
            .optional()
            .map_err(store_err("Get step"))
    }

    /// All steps of a cadence in execution order.
    pub fn list_steps(&self, cadence_id: &str) -> Result<Vec<CadenceStep>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM cadence_steps WHERE cadence_id = ?1
                 ORDER BY day_offset ASC, order_in_day ASC"
            ))
            .map_err(store_err("Prepare"))?;
        let steps = stmt
            .query_map(params![cadence_id], step_from_row)
            .map_err(store_err("List steps"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Read step"))?;
        Ok(steps)
    }

    /// The step immediately following `position` in `(day_offset, order_in_day)` order.
    pub fn next_step_after(
        &self,
        cadence_id: &str,
        position: (i64, i64),
    ) -> Result<Option<CadenceStep>> {
        let (day, order) = position;
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM cadence_steps
                     WHERE cadence_id = ?1
                       AND (day_offset > ?2 OR (day_offset = ?2 AND order_in_day > ?3))
                     ORDER BY day_offset ASC, order_in_day ASC
                     LIMIT 1"
                ),
                params![cadence_id, day, order],
                step_from_row,
            )
            .optional()
            .map_err(store_err("Next step"))
    }

    // ─── Enrolled leads ───────────────────────────────────────

    pub fn upsert_cadence_lead(&self, lead: &CadenceLead) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO cadence_leads (cadence_id, lead_id, current_step_id, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(cadence_id, lead_id) DO UPDATE SET
                   current_step_id = excluded.current_step_id,
                   status = excluded.status,
                   updated_at = excluded.updated_at",
                params![
                    lead.cadence_id,
                    lead.lead_id,
                    lead.current_step_id,
                    lead.status.as_str(),
                    ts(Utc::now()),
                ],
            )
            .map_err(store_err("Save cadence lead"))?;
        Ok(())
    }

    pub fn get_cadence_lead(&self, cadence_id: &str, lead_id: &str) -> Result<Option<CadenceLead>> {
        self.conn()?
            .query_row(
                "SELECT cadence_id, lead_id, current_step_id, status FROM cadence_leads
                 WHERE cadence_id = ?1 AND lead_id = ?2",
                params![cadence_id, lead_id],
                lead_from_row,
            )
            .optional()
            .map_err(store_err("Get cadence lead"))
    }

    pub fn list_cadence_leads(&self, cadence_id: &str) -> Result<Vec<CadenceLead>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT cadence_id, lead_id, current_step_id, status FROM cadence_leads
                 WHERE cadence_id = ?1 ORDER BY lead_id",
            )
            .map_err(store_err("Prepare"))?;
        let leads = stmt
            .query_map(params![cadence_id], lead_from_row)
            .map_err(store_err("List cadence leads"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Read cadence lead"))?;
        Ok(leads)
    }

    /// Point the lead at a step (or none) with a new status.
    pub fn update_lead_progress(
        &self,
        cadence_id: &str,
        lead_id: &str,
        current_step_id: Option<&str>,
        status: LeadStatus,
    ) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE cadence_leads SET current_step_id = ?3, status = ?4, updated_at = ?5
                 WHERE cadence_id = ?1 AND lead_id = ?2",
                params![cadence_id, lead_id, current_step_id, status.as_str(), ts(Utc::now())],
            )
            .map_err(store_err("Update lead progress"))?;
        if changed == 0 {
            return Err(OutreachError::NotFound(format!(
                "cadence lead {cadence_id}/{lead_id}"
            )));
        }
        Ok(())
    }

    // ─── Lead step instances ──────────────────────────────────

    /// Create the instance as `pending`, or reset it to `pending` unless it was already sent.
    pub fn ensure_instance_pending(&self, step_id: &str, lead_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO lead_step_instances (cadence_step_id, lead_id, status, updated_at)
                 VALUES (?1, ?2, 'pending', ?3)
                 ON CONFLICT(cadence_step_id, lead_id) DO UPDATE SET
                   status = 'pending',
                   last_error = NULL,
                   updated_at = excluded.updated_at
                 WHERE lead_step_instances.status != 'sent'",
                params![step_id, lead_id, ts(Utc::now())],
            )
            .map_err(store_err("Ensure instance"))?;
        Ok(())
    }

    pub fn get_instance(&self, step_id: &str, lead_id: &str) -> Result<Option<LeadStepInstance>> {
        self.conn()?
            .query_row(
                "SELECT cadence_step_id, lead_id, status, message_rendered_text, last_error, result_snapshot
                 FROM lead_step_instances WHERE cadence_step_id = ?1 AND lead_id = ?2",
                params![step_id, lead_id],
                |row| {
                    let status: String = row.get(2)?;
                    let snapshot: Option<String> = row.get(5)?;
                    Ok(LeadStepInstance {
                        cadence_step_id: row.get(0)?,
                        lead_id: row.get(1)?,
                        status: InstanceStatus::parse(&status).ok_or_else(|| {
                            conversion_err(2, format!("unknown instance status '{status}'"))
                        })?,
                        message_rendered_text: row.get(3)?,
                        last_error: row.get(4)?,
                        result_snapshot: snapshot.and_then(|s| serde_json::from_str(&s).ok()),
                    })
                },
            )
            .optional()
            .map_err(store_err("Get instance"))
    }

    /// Record a final or intermediate instance outcome, creating the row if needed.
    pub fn record_instance(
        &self,
        step_id: &str,
        lead_id: &str,
        status: InstanceStatus,
        rendered_text: Option<&str>,
        error: Option<&str>,
        snapshot: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO lead_step_instances
                   (cadence_step_id, lead_id, status, message_rendered_text, last_error, result_snapshot, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(cadence_step_id, lead_id) DO UPDATE SET
                   status = excluded.status,
                   message_rendered_text = COALESCE(excluded.message_rendered_text, message_rendered_text),
                   last_error = excluded.last_error,
                   result_snapshot = COALESCE(excluded.result_snapshot, result_snapshot),
                   updated_at = excluded.updated_at",
                params![
                    step_id,
                    lead_id,
                    status.as_str(),
                    rendered_text,
                    error,
                    snapshot.map(|s| s.to_string()),
                    ts(Utc::now()),
                ],
            )
            .map_err(store_err("Record instance"))?;
        Ok(())
    }

    // ─── Schedules ────────────────────────────────────────────

    pub fn insert_schedule(&self, s: &Schedule) -> Result<()> {
        let conn = self.conn()?;
        insert_schedule_on(&conn, s)
    }

    /// Cancel any pending schedule for the same (step, lead) pair, then insert `s`.
    /// Keeps at most one open schedule per pair without a uniqueness constraint.
    pub fn replace_open_schedule(&self, s: &Schedule) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(store_err("Begin"))?;
        let canceled = tx
            .execute(
                "UPDATE schedules SET status = 'canceled', last_error = 'superseded', updated_at = ?3
                 WHERE cadence_step_id = ?1 AND lead_id = ?2 AND status = 'scheduled'",
                params![s.cadence_step_id, s.lead_id, ts(Utc::now())],
            )
            .map_err(store_err("Cancel superseded"))?;
        insert_schedule_on(&tx, s)?;
        tx.commit().map_err(store_err("Commit"))?;
        Ok(canceled)
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        self.conn()?
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                params![id],
                schedule_from_row,
            )
            .optional()
            .map_err(store_err("Get schedule"))
    }

    /// Schedules still `scheduled` whose time has come, oldest first. Read-only.
    pub fn select_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Schedule>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE status = 'scheduled' AND scheduled_at <= ?1
                 ORDER BY scheduled_at ASC, id ASC
                 LIMIT ?2"
            ))
            .map_err(store_err("Prepare"))?;
        let rows = stmt
            .query_map(params![ts(now), limit as i64], schedule_from_row)
            .map_err(store_err("Select due"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Read schedule"))?;
        Ok(rows)
    }

    /// Atomically move a schedule from `scheduled` to `processing`.
    /// Returns `true` only for the caller that performed the transition.
    pub fn claim(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE schedules SET status = 'processing', updated_at = ?2
                 WHERE id = ?1 AND status = 'scheduled'",
                params![id, ts(Utc::now())],
            )
            .map_err(store_err("Claim"))?;
        Ok(changed == 1)
    }

    /// Set the terminal status of a claimed schedule.
    /// Returns `false` if the schedule was not in `processing`.
    pub fn finish(&self, id: &str, status: ScheduleStatus, error: Option<&str>) -> Result<bool> {
        if !status.is_terminal() {
            return Err(OutreachError::Store(format!(
                "finish requires a terminal status, got {}",
                status.as_str()
            )));
        }
        let changed = self
            .conn()?
            .execute(
                "UPDATE schedules SET status = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![id, status.as_str(), error, ts(Utc::now())],
            )
            .map_err(store_err("Finish"))?;
        Ok(changed == 1)
    }

    /// Whether an unclaimed schedule exists for the pair.
    pub fn has_open_schedule(&self, step_id: &str, lead_id: &str) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT COUNT(*) > 0 FROM schedules
                 WHERE cadence_step_id = ?1 AND lead_id = ?2 AND status = 'scheduled'",
                params![step_id, lead_id],
                |r| r.get(0),
            )
            .map_err(store_err("Open schedule lookup"))
    }

    /// Whether another schedule for the pair already executed.
    pub fn has_executed_schedule(&self, step_id: &str, lead_id: &str, except_id: &str) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT COUNT(*) > 0 FROM schedules
                 WHERE cadence_step_id = ?1 AND lead_id = ?2 AND status = 'executed' AND id != ?3",
                params![step_id, lead_id, except_id],
                |r| r.get(0),
            )
            .map_err(store_err("Executed schedule lookup"))
    }

    /// All schedules for a pair, newest first.
    pub fn schedules_for_pair(&self, step_id: &str, lead_id: &str) -> Result<Vec<Schedule>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE cadence_step_id = ?1 AND lead_id = ?2
                 ORDER BY created_at DESC, id DESC"
            ))
            .map_err(store_err("Prepare"))?;
        let rows = stmt
            .query_map(params![step_id, lead_id], schedule_from_row)
            .map_err(store_err("Schedules for pair"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Read schedule"))?;
        Ok(rows)
    }

    /// Cancel every unclaimed schedule of a lead in a cadence. Processing rows are left alone.
    pub fn cancel_open_schedules(&self, cadence_id: &str, lead_id: &str, reason: &str) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE schedules SET status = 'canceled', last_error = ?3, updated_at = ?4
                 WHERE cadence_id = ?1 AND lead_id = ?2 AND status = 'scheduled'",
                params![cadence_id, lead_id, reason, ts(Utc::now())],
            )
            .map_err(store_err("Cancel schedules"))
    }

    // ─── Activity log ─────────────────────────────────────────

    pub fn log_activity(&self, entry: &ActivityEntry) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO activity_log (owner_id, cadence_id, step_id, lead_id, action, status, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.owner_id,
                    entry.cadence_id,
                    entry.step_id,
                    entry.lead_id,
                    entry.action,
                    entry.status,
                    entry.details.to_string(),
                    ts(Utc::now()),
                ],
            )
            .map_err(store_err("Log activity"))?;
        Ok(())
    }

    /// Most recent activity entries, newest first.
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, cadence_id, step_id, lead_id, action, status, details, created_at
                 FROM activity_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(store_err("Prepare"))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let details: String = row.get(7)?;
                Ok(ActivityRecord {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    cadence_id: row.get(2)?,
                    step_id: row.get(3)?,
                    lead_id: row.get(4)?,
                    action: row.get(5)?,
                    status: row.get(6)?,
                    details: serde_json::from_str(&details).unwrap_or_default(),
                    created_at: row.get(8)?,
                })
            })
            .map_err(store_err("Recent activity"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Read activity"))?;
        Ok(rows)
    }
}

fn insert_schedule_on(conn: &Connection, s: &Schedule) -> Result<()> {
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO schedules
           (id, cadence_id, cadence_step_id, lead_id, owner_id, scheduled_at, timezone, status,
            last_error, message_template_text, message_rendered_text, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            s.id,
            s.cadence_id,
            s.cadence_step_id,
            s.lead_id,
            s.owner_id,
            ts(s.scheduled_at),
            s.timezone,
            s.status.as_str(),
            s.last_error,
            s.message_template_text,
            s.message_rendered_text,
            now,
        ],
    )
    .map_err(store_err("Insert schedule"))?;
    Ok(())
}

#[async_trait]
impl ActivityLogger for CadenceDb {
    async fn log(&self, entry: ActivityEntry) -> Result<()> {
        self.log_activity(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::{Arc, Barrier};

    fn temp_db() -> CadenceDb {
        CadenceDb::open_in_memory().unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn schedule(id: &str, step: &str, lead: &str, when: DateTime<Utc>) -> Schedule {
        Schedule {
            id: id.into(),
            cadence_id: "cad-1".into(),
            cadence_step_id: step.into(),
            lead_id: lead.into(),
            owner_id: "owner-1".into(),
            scheduled_at: when,
            timezone: "UTC".into(),
            status: ScheduleStatus::Scheduled,
            last_error: None,
            message_template_text: None,
            message_rendered_text: None,
        }
    }

    fn step(id: &str, day: i64, order: i64) -> CadenceStep {
        let step_type = StepType::LinkedinMessage;
        CadenceStep {
            id: id.into(),
            cadence_id: "cad-1".into(),
            config: StepConfig::from_json(&step_type, &json!({"message_template": "hi"})),
            step_type,
            step_label: id.into(),
            day_offset: day,
            order_in_day: order,
        }
    }

    #[test]
    fn test_select_due_orders_and_limits() {
        let db = temp_db();
        db.insert_schedule(&schedule("s-late", "st", "l1", at(9, 30))).unwrap();
        db.insert_schedule(&schedule("s-early", "st", "l2", at(8, 0))).unwrap();
        db.insert_schedule(&schedule("s-future", "st", "l3", at(11, 0))).unwrap();

        let due = db.select_due(at(10, 0), 50).unwrap();
        let ids: Vec<_> = due.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s-early", "s-late"]);

        let due = db.select_due(at(10, 0), 1).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "s-early");

        // Read-only: repeated calls see the same rows.
        assert_eq!(db.select_due(at(10, 0), 50).unwrap().len(), 2);
    }

    #[test]
    fn test_claim_is_single_winner() {
        let db = temp_db();
        db.insert_schedule(&schedule("s1", "st", "l1", at(8, 0))).unwrap();
        assert!(db.claim("s1").unwrap());
        assert!(!db.claim("s1").unwrap());
        assert!(db.select_due(at(10, 0), 50).unwrap().is_empty());
        assert_eq!(
            db.get_schedule("s1").unwrap().unwrap().status,
            ScheduleStatus::Processing
        );
    }

    #[test]
    fn test_claim_ignores_canceled() {
        let db = temp_db();
        db.insert_schedule(&schedule("s1", "st", "l1", at(8, 0))).unwrap();
        assert_eq!(db.cancel_open_schedules("cad-1", "l1", "replied").unwrap(), 1);
        assert!(!db.claim("s1").unwrap());
    }

    #[test]
    fn test_concurrent_claims_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        let seed = CadenceDb::open(&path, Duration::from_secs(10)).unwrap();
        for i in 0..5 {
            seed.insert_schedule(&schedule(&format!("s{i}"), "st", &format!("l{i}"), at(8, 0)))
                .unwrap();
        }

        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let db = CadenceDb::open(&path, Duration::from_secs(10)).unwrap();
                    barrier.wait();
                    (0..5)
                        .filter(|i| db.claim(&format!("s{i}")).unwrap())
                        .count()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 5, "each schedule must be claimed exactly once");
    }

    #[test]
    fn test_finish_requires_processing() {
        let db = temp_db();
        db.insert_schedule(&schedule("s1", "st", "l1", at(8, 0))).unwrap();
        assert!(!db.finish("s1", ScheduleStatus::Executed, None).unwrap());
        assert!(db.claim("s1").unwrap());
        assert!(db.finish("s1", ScheduleStatus::Failed, Some("boom")).unwrap());
        let s = db.get_schedule("s1").unwrap().unwrap();
        assert_eq!(s.status, ScheduleStatus::Failed);
        assert_eq!(s.last_error.as_deref(), Some("boom"));
        assert!(db.finish("s1", ScheduleStatus::Scheduled, None).is_err());
    }

    #[test]
    fn test_replace_open_schedule_cancels_previous() {
        let db = temp_db();
        db.insert_schedule(&schedule("old", "st", "l1", at(8, 0))).unwrap();
        let canceled = db
            .replace_open_schedule(&schedule("new", "st", "l1", at(9, 0)))
            .unwrap();
        assert_eq!(canceled, 1);
        let pair = db.schedules_for_pair("st", "l1").unwrap();
        assert_eq!(pair.len(), 2);
        let old = pair.iter().find(|s| s.id == "old").unwrap();
        assert_eq!(old.status, ScheduleStatus::Canceled);
        assert!(db.has_open_schedule("st", "l1").unwrap());
    }

    #[test]
    fn test_next_step_ordering() {
        let db = temp_db();
        db.upsert_step(&step("d0o1", 0, 1)).unwrap();
        db.upsert_step(&step("d1o0", 1, 0)).unwrap();
        db.upsert_step(&step("d0o0", 0, 0)).unwrap();
        db.upsert_step(&step("d3o0", 3, 0)).unwrap();

        let order: Vec<_> = db
            .list_steps("cad-1")
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(order, vec!["d0o0", "d0o1", "d1o0", "d3o0"]);

        assert_eq!(db.next_step_after("cad-1", (0, 0)).unwrap().unwrap().id, "d0o1");
        assert_eq!(db.next_step_after("cad-1", (0, 1)).unwrap().unwrap().id, "d1o0");
        assert_eq!(db.next_step_after("cad-1", (1, 0)).unwrap().unwrap().id, "d3o0");
        assert!(db.next_step_after("cad-1", (3, 0)).unwrap().is_none());
    }

    #[test]
    fn test_step_position_unique_per_cadence() {
        let db = temp_db();
        db.upsert_step(&step("a", 0, 0)).unwrap();
        assert!(db.upsert_step(&step("b", 0, 0)).is_err());
    }

    #[test]
    fn test_instance_lifecycle() {
        let db = temp_db();
        db.ensure_instance_pending("st", "l1").unwrap();
        assert_eq!(
            db.get_instance("st", "l1").unwrap().unwrap().status,
            InstanceStatus::Pending
        );

        db.record_instance("st", "l1", InstanceStatus::Generated, Some("hello"), None, None)
            .unwrap();
        db.record_instance(
            "st",
            "l1",
            InstanceStatus::Sent,
            None,
            None,
            Some(&json!({"message_id": "m-1"})),
        )
        .unwrap();
        let inst = db.get_instance("st", "l1").unwrap().unwrap();
        assert_eq!(inst.status, InstanceStatus::Sent);
        assert_eq!(inst.message_rendered_text.as_deref(), Some("hello"));
        assert_eq!(inst.result_snapshot, Some(json!({"message_id": "m-1"})));

        // A sent instance is never reset back to pending.
        db.ensure_instance_pending("st", "l1").unwrap();
        assert_eq!(
            db.get_instance("st", "l1").unwrap().unwrap().status,
            InstanceStatus::Sent
        );
    }

    #[test]
    fn test_lead_progress_requires_enrollment() {
        let db = temp_db();
        let err = db
            .update_lead_progress("cad-1", "ghost", None, LeadStatus::Completed)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_activity_logger_persists() {
        let db = temp_db();
        ActivityLogger::log(
            &db,
            ActivityEntry {
                owner_id: "owner-1".into(),
                cadence_id: "cad-1".into(),
                step_id: Some("st".into()),
                lead_id: "l1".into(),
                action: "linkedin_message".into(),
                status: "executed".into(),
                details: json!({"schedule_id": "s1"}),
            },
        )
        .await
        .unwrap();
        let recent = db.recent_activity(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].details["schedule_id"], "s1");
    }
}
