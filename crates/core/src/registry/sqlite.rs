//! SQLite-backed registry implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::types::action_kinds;
use super::{
    ActionLogEntry, ActionOutcome, ApiUsageRecord, ConversationMessage, DailyStats, ItemFilter,
    ItemStatus, MessageDirection, NewActionLogEntry, NewMessage, NewWorkItem, Registry,
    RegistryError, WorkItem,
};
use crate::notify::{NotificationRecord, NotificationStore};
use crate::pacing::{ActionCountStore, ActionKind};

const ITEM_COLUMNS: &str = "data, cancel_requested, api_cost_usd, api_tokens";

/// SQLite-backed registry. Also stores notifications and daily action counters.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

/// Timestamps are stored as fixed-width UTC strings so they sort lexically.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// UTC bounds of a local calendar day.
fn day_bounds(day: NaiveDate) -> (String, String) {
    let start = local_midnight(day);
    let end = day
        .succ_opt()
        .map(local_midnight)
        .unwrap_or_else(|| start + chrono::Duration::days(1));
    (ts(&start), ts(&end))
}

fn local_midnight(day: NaiveDate) -> DateTime<Utc> {
    let naive = day.and_time(chrono::NaiveTime::MIN);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

impl SqliteRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn new(path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory registry (useful for testing).
    pub fn in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RegistryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                external_ref TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                parked_until TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                api_cost_usd REAL NOT NULL DEFAULT 0,
                api_tokens INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
            CREATE INDEX IF NOT EXISTS idx_work_items_created_at ON work_items(created_at);

            CREATE TABLE IF NOT EXISTS action_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                outcome TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_action_log_item ON action_log(item_id);
            CREATE INDEX IF NOT EXISTS idx_action_log_created_at ON action_log(created_at);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id TEXT NOT NULL,
                external_id TEXT,
                direction TEXT NOT NULL,
                origin TEXT NOT NULL,
                body TEXT NOT NULL,
                intent TEXT,
                created_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_external
                ON messages(item_id, external_id);

            CREATE TABLE IF NOT EXISTS api_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id TEXT,
                purpose TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_api_usage_created_at ON api_usage(created_at);

            CREATE TABLE IF NOT EXISTS daily_counters (
                day TEXT NOT NULL,
                kind TEXT NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (day, kind)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                item_id TEXT,
                priority TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_timestamp ON notifications(timestamp);
            "#,
        )?;
        Ok(())
    }

    fn build_where_clause(filter: &ItemFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            conditions.push(format!("status IN ({})", placeholders));
            for status in &filter.statuses {
                params.push(Box::new(status.as_str()));
            }
        }

        if let Some(ref now) = filter.ready_at {
            conditions.push("(parked_until IS NULL OR parked_until <= ?)".to_string());
            params.push(Box::new(ts(now)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<(String, bool, f64, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode_item(raw: (String, bool, f64, i64)) -> Result<WorkItem, RegistryError> {
        let (data, cancel_requested, api_cost_usd, api_tokens) = raw;
        let mut item: WorkItem = serde_json::from_str(&data)?;
        item.cancel_requested = cancel_requested;
        item.api_cost_usd = api_cost_usd;
        item.api_tokens = api_tokens.max(0) as u64;
        Ok(item)
    }

    fn fetch_item(conn: &Connection, column: &str, value: &str) -> Result<Option<WorkItem>, RegistryError> {
        let sql = format!("SELECT {} FROM work_items WHERE {} = ?", ITEM_COLUMNS, column);
        let raw = conn
            .query_row(&sql, params![value], Self::row_to_item)
            .optional()?;
        raw.map(Self::decode_item).transpose()
    }

    fn insert_action(
        tx: &Transaction<'_>,
        entry: &NewActionLogEntry,
        at: &DateTime<Utc>,
    ) -> Result<i64, RegistryError> {
        tx.execute(
            "INSERT INTO action_log (item_id, kind, outcome, detail, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                entry.item_id,
                entry.kind,
                entry.outcome.as_str(),
                entry.detail,
                ts(at),
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    fn count_actions(
        conn: &Connection,
        kind: &str,
        outcome: ActionOutcome,
        range: &(String, String),
    ) -> Result<i64, RegistryError> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE kind = ? AND outcome = ? AND created_at >= ? AND created_at < ?",
            params![kind, outcome.as_str(), range.0, range.1],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl Registry for SqliteRegistry {
    fn create_if_absent(&self, request: NewWorkItem) -> Result<Option<WorkItem>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let item = WorkItem::new(request);
        let data = serde_json::to_string(&item)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO work_items (id, external_ref, status, data, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                item.id,
                item.external_ref,
                item.status.as_str(),
                data,
                ts(&item.created_at),
                ts(&item.updated_at),
            ],
        )?;

        Ok((inserted > 0).then_some(item))
    }

    fn get(&self, id: &str) -> Result<Option<WorkItem>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_item(&conn, "id", id)
    }

    fn get_by_ref(&self, external_ref: &str) -> Result<Option<WorkItem>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_item(&conn, "external_ref", external_ref)
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<WorkItem>, RegistryError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM work_items {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            ITEM_COLUMNS, where_clause
        );

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(Self::decode_item(row?)?);
        }
        Ok(items)
    }

    fn count(&self, filter: &ItemFilter) -> Result<i64, RegistryError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM work_items {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn count_by_status(&self) -> Result<BTreeMap<ItemStatus, i64>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM work_items GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = ItemStatus::parse(&status) {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    fn commit_stage(
        &self,
        item: &WorkItem,
        expected: ItemStatus,
        actions: &[NewActionLogEntry],
    ) -> Result<WorkItem, RegistryError> {
        if item.status != expected && !expected.can_transition_to(item.status) {
            return Err(RegistryError::InvalidTransition {
                id: item.id.clone(),
                from: expected,
                to: item.status,
            });
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let now = Utc::now();
        let mut stored = item.clone();
        stored.updated_at = now;
        let data = serde_json::to_string(&stored)?;

        let changed = tx.execute(
            "UPDATE work_items SET status = ?, data = ?, parked_until = ?, updated_at = ? WHERE id = ? AND status = ?",
            params![
                stored.status.as_str(),
                data,
                stored.parked_until.as_ref().map(ts),
                ts(&now),
                stored.id,
                expected.as_str(),
            ],
        )?;

        if changed == 0 {
            let actual: Option<String> = tx
                .query_row(
                    "SELECT status FROM work_items WHERE id = ?",
                    params![stored.id],
                    |row| row.get(0),
                )
                .optional()?;
            return match actual {
                None => Err(RegistryError::NotFound(stored.id)),
                Some(actual) => Err(RegistryError::Conflict {
                    id: stored.id,
                    expected,
                    actual: ItemStatus::parse(&actual).unwrap_or(ItemStatus::Error),
                }),
            };
        }

        for entry in actions {
            Self::insert_action(&tx, entry, &now)?;
        }

        let (cancel_requested, api_cost_usd, api_tokens): (bool, f64, i64) = tx.query_row(
            "SELECT cancel_requested, api_cost_usd, api_tokens FROM work_items WHERE id = ?",
            params![stored.id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        tx.commit()?;

        stored.cancel_requested = cancel_requested;
        stored.api_cost_usd = api_cost_usd;
        stored.api_tokens = api_tokens.max(0) as u64;
        Ok(stored)
    }

    fn request_cancel(&self, id: &str) -> Result<WorkItem, RegistryError> {
        let conn = self.conn.lock().unwrap();

        let mut item = Self::fetch_item(&conn, "id", id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if item.status.is_terminal() {
            return Err(RegistryError::InvalidState {
                id: id.to_string(),
                status: item.status,
                operation: "cancel".to_string(),
            });
        }

        conn.execute(
            "UPDATE work_items SET cancel_requested = 1 WHERE id = ?",
            params![id],
        )?;
        item.cancel_requested = true;
        Ok(item)
    }

    fn append_action(&self, entry: NewActionLogEntry) -> Result<ActionLogEntry, RegistryError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let id = Self::insert_action(&tx, &entry, &now)?;
        tx.commit()?;

        Ok(ActionLogEntry {
            id,
            item_id: entry.item_id,
            kind: entry.kind,
            outcome: entry.outcome,
            detail: entry.detail,
            created_at: now,
        })
    }

    fn actions(&self, item_id: &str) -> Result<Vec<ActionLogEntry>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, item_id, kind, outcome, detail, created_at FROM action_log WHERE item_id = ? ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            let outcome: String = row.get(3)?;
            let created_at: String = row.get(5)?;
            Ok(ActionLogEntry {
                id: row.get(0)?,
                item_id: row.get(1)?,
                kind: row.get(2)?,
                outcome: ActionOutcome::parse(&outcome),
                detail: row.get(4)?,
                created_at: parse_ts(&created_at),
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn append_message(
        &self,
        message: NewMessage,
    ) -> Result<Option<ConversationMessage>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let direction = serde_json::to_value(message.direction)?;
        let origin = serde_json::to_value(message.origin)?;
        let intent = message.intent.map(|i| i.as_str());

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (item_id, external_id, direction, origin, body, intent, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                message.item_id,
                message.external_id,
                direction.as_str(),
                origin.as_str(),
                message.body,
                intent,
                ts(&now),
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(ConversationMessage {
            id: conn.last_insert_rowid(),
            item_id: message.item_id,
            external_id: message.external_id,
            direction: message.direction,
            origin: message.origin,
            body: message.body,
            intent: message.intent,
            created_at: now,
        }))
    }

    fn messages(&self, item_id: &str) -> Result<Vec<ConversationMessage>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, item_id, external_id, direction, origin, body, intent, created_at FROM messages WHERE item_id = ? ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, item_id, external_id, direction, origin, body, intent, created_at) = row?;
            messages.push(ConversationMessage {
                id,
                item_id,
                external_id,
                direction: serde_json::from_value(serde_json::Value::String(direction))?,
                origin: serde_json::from_value(serde_json::Value::String(origin))?,
                body,
                intent: intent
                    .map(|i| serde_json::from_value(serde_json::Value::String(i)))
                    .transpose()?,
                created_at: parse_ts(&created_at),
            });
        }
        Ok(messages)
    }

    fn record_usage(&self, usage: &ApiUsageRecord) -> Result<(), RegistryError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO api_usage (item_id, purpose, provider, model, input_tokens, output_tokens, cost_usd, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                usage.item_id,
                usage.purpose,
                usage.provider,
                usage.model,
                usage.input_tokens,
                usage.output_tokens,
                usage.cost_usd,
                ts(&Utc::now()),
            ],
        )?;

        if let Some(ref item_id) = usage.item_id {
            let tokens = i64::from(usage.input_tokens) + i64::from(usage.output_tokens);
            tx.execute(
                "UPDATE work_items SET api_cost_usd = api_cost_usd + ?, api_tokens = api_tokens + ? WHERE id = ?",
                params![usage.cost_usd, tokens, item_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn daily_stats(&self, day: NaiveDate) -> Result<DailyStats, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let range = day_bounds(day);

        let discovered: i64 = conn.query_row(
            "SELECT COUNT(*) FROM work_items WHERE created_at >= ? AND created_at < ?",
            params![range.0, range.1],
            |row| row.get(0),
        )?;

        let (api_cost_usd, api_tokens): (f64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0), COALESCE(SUM(input_tokens + output_tokens), 0) FROM api_usage WHERE created_at >= ? AND created_at < ?",
            params![range.0, range.1],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(DailyStats {
            day: day.to_string(),
            discovered,
            bids_placed: Self::count_actions(
                &conn,
                action_kinds::PLACE_BID,
                ActionOutcome::Succeeded,
                &range,
            )?,
            accepted: Self::count_actions(
                &conn,
                action_kinds::BID_ACCEPTED,
                ActionOutcome::Succeeded,
                &range,
            )?,
            delivered: Self::count_actions(
                &conn,
                action_kinds::DELIVER_FINAL,
                ActionOutcome::Succeeded,
                &range,
            )?,
            completed: Self::count_actions(
                &conn,
                action_kinds::COMPLETE,
                ActionOutcome::Succeeded,
                &range,
            )?,
            failed: Self::count_actions(
                &conn,
                action_kinds::ITEM_FAILED,
                ActionOutcome::Failed,
                &range,
            )?,
            api_cost_usd,
            api_tokens,
        })
    }
}

impl ActionCountStore for SqliteRegistry {
    fn load_counts(&self, day: NaiveDate) -> Result<BTreeMap<ActionKind, u32>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT kind, count FROM daily_counters WHERE day = ?")?;
        let rows = stmt.query_map(params![day.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (kind, count) = row?;
            if let Some(kind) = ActionKind::parse(&kind) {
                counts.insert(kind, count);
            }
        }
        Ok(counts)
    }

    fn store_count(&self, day: NaiveDate, kind: ActionKind, count: u32) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO daily_counters (day, kind, count) VALUES (?, ?, ?) ON CONFLICT(day, kind) DO UPDATE SET count = excluded.count",
            params![day.to_string(), kind.as_str(), count],
        )?;
        Ok(())
    }
}

impl NotificationStore for SqliteRegistry {
    fn insert(&self, record: &NotificationRecord) -> Result<i64, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(&record.data)?;
        conn.execute(
            "INSERT INTO notifications (timestamp, event_type, item_id, priority, data) VALUES (?, ?, ?, ?, ?)",
            params![
                ts(&record.timestamp),
                record.event_type,
                record.item_id,
                record.priority.as_str(),
                data,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, limit: i64) -> Result<Vec<NotificationRecord>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, data FROM notifications ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, data) = row?;
            let mut record = NotificationRecord::new(parse_ts(&timestamp), serde_json::from_str(&data)?);
            record.id = id;
            records.push(record);
        }
        Ok(records)
    }
}
