//! In-process DuckDB execution.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{Connection, InterruptHandle};
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::error::ComputeError;
use crate::result::ExecutionResult;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Executes SQL against an embedded DuckDB database.
///
/// The root connection only opens the database and hands out clones. Each
/// statement runs on its own cloned connection on the blocking pool, so
/// statements never wait on each other. Dropping an execution future
/// before it completes interrupts the statement.
#[derive(Clone)]
pub struct LocalExecutor {
    root: Arc<Mutex<Connection>>,
}

/// Interrupts the statement on a connection unless disarmed.
struct InterruptOnDrop {
    handle: Option<Arc<InterruptHandle>>,
}

impl InterruptOnDrop {
    fn new(handle: Arc<InterruptHandle>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("interrupting abandoned local statement");
            handle.interrupt();
        }
    }
}

impl LocalExecutor {
    /// Open a database file, or an in-memory database when `path` is `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, ComputeError> {
        let conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, ComputeError> {
        Self::open(None)
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            root: Arc::new(Mutex::new(conn)),
        }
    }

    /// A fresh connection to the same database.
    fn session(&self) -> Result<Connection, ComputeError> {
        let root = self
            .root
            .lock()
            .map_err(|e| ComputeError::Internal(format!("lock poisoned: {}", e)))?;
        Ok(root.try_clone()?)
    }

    /// Run a batch of statements synchronously (setup and seeding).
    pub fn execute_batch(&self, sql: &str) -> Result<(), ComputeError> {
        self.session()?.execute_batch(sql)?;
        Ok(())
    }

    /// Execute each init file in order.
    pub fn run_init_files(&self, files: &[PathBuf]) -> Result<(), ComputeError> {
        for file in files {
            let sql = std::fs::read_to_string(file).map_err(|e| {
                ComputeError::Internal(format!("failed to read {}: {}", file.display(), e))
            })?;
            self.execute_batch(&sql)?;
            info!(file = %file.display(), "init SQL executed");
        }
        Ok(())
    }

    /// Execute one statement and materialize every row.
    pub async fn execute(&self, sql: &str) -> Result<ExecutionResult, ComputeError> {
        self.execute_limited(sql, None).await
    }

    /// Execute one statement, failing once more than `max_rows` rows are read.
    pub async fn execute_limited(
        &self,
        sql: &str,
        max_rows: Option<usize>,
    ) -> Result<ExecutionResult, ComputeError> {
        let conn = self.session()?;
        let guard = InterruptOnDrop::new(conn.interrupt_handle());
        let query = sql.to_string();

        let result = tokio::task::spawn_blocking(move || run_query(&conn, &query, max_rows))
            .await
            .map_err(|e| ComputeError::Internal(format!("execution task failed: {}", e)))?;
        guard.disarm();
        result
    }

    /// Engine version string, e.g. `v1.1.3`.
    pub async fn version(&self) -> Result<String, ComputeError> {
        let result = self.execute("SELECT version() AS version").await?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

fn run_query(
    conn: &Connection,
    sql: &str,
    max_rows: Option<usize>,
) -> Result<ExecutionResult, ComputeError> {
    debug!(sql = %sql, "executing locally");
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns = rows
        .as_ref()
        .map(|s| s.column_names())
        .unwrap_or_default();

    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        if let Some(limit) = max_rows {
            if result.len() >= limit {
                return Err(ComputeError::ResultTooLarge(limit));
            }
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(to_json(row.get_ref(i)?));
        }
        result.push(values);
    }

    Ok(ExecutionResult::new(columns, result))
}

fn to_json(val: ValueRef<'_>) -> Value {
    match val {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => match i64::try_from(i) {
            Ok(v) => Value::from(v),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => float(f as f64),
        ValueRef::Double(f) => float(f),
        ValueRef::Decimal(d) => Value::String(d.to_string()),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).to_string()),
        ValueRef::Blob(bytes) => Value::String(
            bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
        ),
        ValueRef::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_CE_DAYS)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, value) => {
            let micros = match unit {
                TimeUnit::Second => value.saturating_mul(1_000_000),
                TimeUnit::Millisecond => value.saturating_mul(1_000),
                TimeUnit::Microsecond => value,
                TimeUnit::Nanosecond => value / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|ts| Value::String(ts.naive_utc().to_string()))
                .unwrap_or(Value::Null)
        }
        _ => Value::String(format!("{:?}", val)),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}
