//! SQLite-backed task log.
//!
//! One writer connection and one reader connection, each behind its own
//! mutex: writes are serialized, reads never wait on a write transaction
//! thanks to WAL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::error::{TaskLogError, TaskLogResult};
use crate::query::{TaskPage, TaskQuery};
use crate::record::{truncate_body, NewTask, TaskRecord};
use crate::stats::TaskStats;

pub const DB_FILE: &str = "tasks.db";

const COLUMNS: &str = "id, created_at, action, module, channel, session_key, request, \
                       response, status, note, duration_ms, tokens_input, tokens_output";

pub struct TaskLog {
    db_path: PathBuf,
    writer: Mutex<Option<Connection>>,
    reader: Mutex<Option<Connection>>,
}

impl TaskLog {
    /// Open `<dir>/tasks.db`, creating the directory and schema if needed.
    pub fn open(dir: &Path) -> TaskLogResult<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);

        let writer = open_connection(&db_path)?;
        initialize_schema(&writer)?;
        let reader = open_connection(&db_path)?;

        tracing::debug!(path = %db_path.display(), "task log opened");
        Ok(Self {
            db_path,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> TaskLogResult<T>) -> TaskLogResult<T> {
        let mut guard = self.writer.lock();
        let conn = guard.as_mut().ok_or(TaskLogError::Closed)?;
        f(conn)
    }

    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> TaskLogResult<T>) -> TaskLogResult<T> {
        let guard = self.reader.lock();
        let conn = guard.as_ref().ok_or(TaskLogError::Closed)?;
        f(conn)
    }

    /// Insert a record, stamping the current time. Returns the new id.
    pub fn log(&self, task: NewTask) -> TaskLogResult<i64> {
        let now = Utc::now();
        self.with_writer(|conn| {
            conn.execute(
                r#"
                INSERT INTO tasks (
                    created_at, created_ms, action, module, channel, session_key,
                    request, response, status, note, duration_ms, tokens_input, tokens_output
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    now.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    now.timestamp_millis(),
                    task.action,
                    task.module,
                    task.channel,
                    task.session_key,
                    truncate_body(&task.request),
                    truncate_body(&task.response),
                    task.status.as_str(),
                    task.note,
                    task.duration_ms.map(to_i64),
                    task.tokens_input.map(to_i64),
                    task.tokens_output.map(to_i64),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn query(&self, query: &TaskQuery) -> TaskLogResult<TaskPage> {
        let (where_sql, mut values) = query.where_clause()?;
        let order_sql = query.order_clause();

        self.with_reader(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tasks {where_sql}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            values.push(rusqlite::types::Value::Integer(to_i64(query.effective_limit() as u64)));
            let limit_idx = values.len();
            values.push(rusqlite::types::Value::Integer(to_i64(query.offset as u64)));
            let offset_idx = values.len();

            let sql = format!(
                "SELECT {COLUMNS} FROM tasks {where_sql} {order_sql} LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
            );
            let mut statement = conn.prepare(&sql)?;
            let mut rows = statement.query(params_from_iter(values.iter()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(record_from_row(row)?);
            }
            Ok(TaskPage {
                records,
                total: total.max(0) as u64,
            })
        })
    }

    pub fn get(&self, id: i64) -> TaskLogResult<Option<TaskRecord>> {
        self.with_reader(|conn| {
            let mut statement = conn.prepare(&format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"))?;
            let mut rows = statement.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(record_from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn count(&self) -> TaskLogResult<u64> {
        self.with_reader(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
    }

    pub fn stats(&self) -> TaskLogResult<TaskStats> {
        self.with_reader(|conn| {
            let mut stats = TaskStats::default();

            let (total, tokens_in, tokens_out, avg_duration, earliest, latest): (
                i64,
                i64,
                i64,
                Option<f64>,
                Option<i64>,
                Option<i64>,
            ) = conn.query_row(
                r#"
                SELECT COUNT(*), COALESCE(SUM(tokens_input), 0), COALESCE(SUM(tokens_output), 0),
                       AVG(duration_ms), MIN(created_ms), MAX(created_ms)
                FROM tasks
                "#,
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )?;
            stats.total = total.max(0) as u64;
            stats.tokens_input = tokens_in.max(0) as u64;
            stats.tokens_output = tokens_out.max(0) as u64;
            stats.avg_duration_ms = avg_duration;
            stats.earliest = earliest.and_then(ms_to_rfc3339);
            stats.latest = latest.and_then(ms_to_rfc3339);

            for (column, target) in [
                ("action", &mut stats.by_action),
                ("module", &mut stats.by_module),
                ("status", &mut stats.by_status),
            ] {
                let mut statement = conn.prepare(&format!(
                    "SELECT {column}, COUNT(*) FROM tasks GROUP BY {column}"
                ))?;
                let rows = statement.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (key, n) = row?;
                    target.insert(key, n.max(0) as u64);
                }
            }
            Ok(stats)
        })
    }

    /// Delete records older than `max_age_days` (0 disables the age rule),
    /// then the oldest records beyond `max_records` (0 disables the count
    /// rule). Returns the number of deleted rows.
    pub fn cleanup(&self, max_age_days: u32, max_records: u64) -> TaskLogResult<u64> {
        let cutoff = (max_age_days > 0)
            .then(|| Utc::now() - chrono::Duration::days(i64::from(max_age_days)));

        let deleted = self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0usize;
            if let Some(cutoff) = cutoff {
                deleted += tx.execute(
                    "DELETE FROM tasks WHERE created_ms < ?1",
                    params![cutoff.timestamp_millis()],
                )?;
            }
            if max_records > 0 {
                let remaining: i64 = tx.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?;
                let excess = remaining - to_i64(max_records);
                if excess > 0 {
                    deleted += tx.execute(
                        r#"
                        DELETE FROM tasks WHERE id IN (
                            SELECT id FROM tasks ORDER BY created_ms ASC, id ASC LIMIT ?1
                        )
                        "#,
                        params![excess],
                    )?;
                }
            }
            tx.commit()?;
            Ok(deleted as u64)
        })?;

        if deleted > 0 {
            tracing::info!(deleted, max_age_days, max_records, "task log cleanup");
        }
        Ok(deleted)
    }

    /// Drop both connections. Later calls fail with [`TaskLogError::Closed`].
    pub fn close(&self) {
        if let Some(conn) = self.writer.lock().take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "closing task log writer");
            }
        }
        self.reader.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }
}

fn open_connection(path: &Path) -> TaskLogResult<Connection> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> TaskLogResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            created_ms INTEGER NOT NULL,
            action TEXT NOT NULL,
            module TEXT NOT NULL,
            channel TEXT NULL,
            session_key TEXT NULL,
            request TEXT NOT NULL DEFAULT '',
            response TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            note TEXT NULL,
            duration_ms INTEGER NULL,
            tokens_input INTEGER NULL,
            tokens_output INTEGER NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks (created_ms);
        CREATE INDEX IF NOT EXISTS idx_tasks_action ON tasks (action, created_ms);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, created_ms);
        "#,
    )?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> TaskLogResult<TaskRecord> {
    let status: String = row.get(8)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        created_at: row.get(1)?,
        action: row.get(2)?,
        module: row.get(3)?,
        channel: row.get(4)?,
        session_key: row.get(5)?,
        request: row.get(6)?,
        response: row.get(7)?,
        status: status
            .parse()
            .map_err(|_| TaskLogError::Corrupt(format!("status '{status}'")))?,
        note: row.get(9)?,
        duration_ms: row.get::<_, Option<i64>>(10)?.map(from_i64),
        tokens_input: row.get::<_, Option<i64>>(11)?.map(from_i64),
        tokens_output: row.get::<_, Option<i64>>(12)?.map(from_i64),
    })
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_i64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn ms_to_rfc3339(ms: i64) -> Option<String> {
    let dt: DateTime<Utc> = Utc.timestamp_millis_opt(ms).single()?;
    Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
