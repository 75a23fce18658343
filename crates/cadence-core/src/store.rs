//! Entry persistence
//!
//! One Postgres row per entry, keyed by task id, holding the history and
//! error documents produced by the entry codec. Updates are additive: rows
//! already persisted are never overwritten, new rows are unioned in.
//! Persistence is best-effort: store failures are logged and summarized,
//! never fatal to the scheduler loop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::warn;

use crate::entry::Entry;
use crate::schema::entries;

/// Budget for one per-entry store operation.
const OP_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for closing the connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(160);

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert fresh documents for the given entries.
    async fn add_entries(&self, entries: &[Arc<Entry>]) -> Result<()>;

    /// Merge each entry's history/errors into its persisted document,
    /// falling back to insert when no document exists yet.
    async fn update_entries(&self, entries: &[Arc<Entry>]) -> Result<()>;

    /// Merge persisted rows back into the in-memory entries. Invoked once,
    /// by the steady-state detector.
    async fn update_in_memory_entries_from_storage(&self, entries: &[Arc<Entry>]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Document merging
// ============================================================================

/// Set-union of persisted row arrays. Rows are single-key objects keyed by
/// their execution timestamp; an incoming row whose key is already present
/// is dropped.
pub(crate) fn merge_rows(existing: &Value, incoming: &Value) -> Value {
    let mut merged: Vec<Value> = existing.as_array().cloned().unwrap_or_default();
    let mut seen: HashSet<String> = merged.iter().filter_map(row_key).collect();
    for row in incoming.as_array().into_iter().flatten() {
        if let Some(key) = row_key(row) {
            if seen.insert(key) {
                merged.push(row.clone());
            }
        }
    }
    Value::Array(merged)
}

fn row_key(row: &Value) -> Option<String> {
    row.as_object()?.keys().next().cloned()
}

// ============================================================================
// Postgres store
// ============================================================================

/// Store backed by a single Postgres connection, shared behind a mutex the
/// way the rest of the service accesses the database.
pub struct PgStore {
    conn: Arc<Mutex<Option<PgConnection>>>,
}

impl PgStore {
    pub fn connect(database_url: &str) -> Result<Self> {
        let conn = PgConnection::establish(database_url).context("failed to connect to database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run a blocking database job with a bounded budget.
    async fn run_bounded<T, F>(&self, budget: Duration, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Mutex<Option<PgConnection>>) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        match timeout(budget, tokio::task::spawn_blocking(move || job(&conn))).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("store worker failed: {}", join_err)),
            Err(_) => Err(anyhow::anyhow!("store operation timed out")),
        }
    }
}

fn with_conn<T>(
    conn: &Mutex<Option<PgConnection>>,
    job: impl FnOnce(&mut PgConnection) -> Result<T>,
) -> Result<T> {
    let mut guard = conn
        .lock()
        .map_err(|e| anyhow::anyhow!("lock error: {}", e))?;
    let conn = guard.as_mut().context("store is closed")?;
    job(conn)
}

fn insert_row(conn: &mut PgConnection, task_id: &str, doc: &Value) -> Result<()> {
    let empty = || Value::Array(Vec::new());
    diesel::insert_into(entries::table)
        .values((
            entries::task_id.eq(task_id),
            entries::history.eq(doc.get("history").cloned().unwrap_or_else(empty)),
            entries::errors.eq(doc.get("errors").cloned().unwrap_or_else(empty)),
            entries::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .context("failed to insert entry")?;
    Ok(())
}

fn upsert_row(conn: &mut PgConnection, task_id: &str, doc: &Value) -> Result<()> {
    let existing: Option<(Value, Value)> = entries::table
        .filter(entries::task_id.eq(task_id))
        .select((entries::history, entries::errors))
        .first(conn)
        .optional()
        .context("failed to query entry")?;

    match existing {
        Some((history, errors)) => {
            let merged_history = merge_rows(&history, doc.get("history").unwrap_or(&Value::Null));
            let merged_errors = merge_rows(&errors, doc.get("errors").unwrap_or(&Value::Null));
            diesel::update(entries::table.filter(entries::task_id.eq(task_id)))
                .set((
                    entries::history.eq(merged_history),
                    entries::errors.eq(merged_errors),
                    entries::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .context("failed to update entry")?;
            Ok(())
        }
        None => insert_row(conn, task_id, doc),
    }
}

fn fetch_doc(conn: &mut PgConnection, task_id: &str) -> Result<Option<Value>> {
    let row: Option<(Value, Value)> = entries::table
        .filter(entries::task_id.eq(task_id))
        .select((entries::history, entries::errors))
        .first(conn)
        .optional()
        .context("failed to query entry")?;
    Ok(row.map(|(history, errors)| json!({ "history": history, "errors": errors })))
}

#[async_trait]
impl Store for PgStore {
    async fn add_entries(&self, entries: &[Arc<Entry>]) -> Result<()> {
        let mut failures = 0;
        for entry in entries {
            let task_id = entry.task_id().to_string();
            let doc = entry.to_store_doc();
            let result = self
                .run_bounded(OP_TIMEOUT, move |conn| {
                    with_conn(conn, |conn| insert_row(conn, &task_id, &doc))
                })
                .await;
            if let Err(err) = result {
                warn!(task = %entry.task_id(), "adding entry failed: {:#}", err);
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(anyhow::anyhow!("{} entry insert(s) failed", failures));
        }
        Ok(())
    }

    async fn update_entries(&self, entries: &[Arc<Entry>]) -> Result<()> {
        let mut failures = 0;
        for entry in entries {
            let task_id = entry.task_id().to_string();
            let doc = entry.to_store_doc();
            let result = self
                .run_bounded(OP_TIMEOUT, move |conn| {
                    with_conn(conn, |conn| upsert_row(conn, &task_id, &doc))
                })
                .await;
            if let Err(err) = result {
                warn!(task = %entry.task_id(), "updating entry failed: {:#}", err);
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(anyhow::anyhow!("{} entry update(s) failed", failures));
        }
        Ok(())
    }

    async fn update_in_memory_entries_from_storage(&self, entries: &[Arc<Entry>]) -> Result<()> {
        let mut failures = 0;
        for entry in entries {
            let task_id = entry.task_id().to_string();
            let result = self
                .run_bounded(OP_TIMEOUT, move |conn| {
                    with_conn(conn, |conn| fetch_doc(conn, &task_id))
                })
                .await;
            match result {
                Ok(Some(doc)) => {
                    if let Err(err) = entry.merge_store_doc(&doc) {
                        warn!(task = %entry.task_id(), "merging stored entry failed: {:#}", err);
                        failures += 1;
                    }
                }
                // Nothing persisted yet for this entry.
                Ok(None) => {}
                Err(err) => {
                    warn!(task = %entry.task_id(), "loading entry from store failed: {:#}", err);
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            return Err(anyhow::anyhow!("{} entry load(s) failed", failures));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.run_bounded(CLOSE_TIMEOUT, |conn| {
            let mut guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("lock error: {}", e))?;
            // Dropping the connection closes it.
            guard.take();
            Ok(())
        })
        .await
    }
}
