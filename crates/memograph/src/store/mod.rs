//! Persistent record of entries, results, and dependency edges, with the
//! atomic claim primitive ([`Store::get_or_announce_entry`]) the rest of the
//! system's correctness rests on.

mod codec;
#[cfg(test)]
mod tests;

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;
use crate::fingerprint::ConfigKey;
use crate::refs::{Ref, RefOptions};
use crate::value::Value;

/// A claimed or finished row in the `entries` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub entry_id: i64,
    pub name: String,
    pub version: u32,
    pub config_key: ConfigKey,
    pub replica: u32,
    pub config: Value,
    pub result: Option<Value>,
    pub created_date: u64,
    pub finished_date: Option<u64>,
    /// Opaque per-entry metadata; schema intentionally left to the caller
    /// (written as an empty object by default — see the crate's design notes).
    pub run_info: Value,
}

/// The outcome of [`Store::get_or_announce_entry`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimStatus {
    /// No entry existed; one was just announced and the caller must compute it.
    ComputeHere,
    /// An entry is already announced (unfinished) by some other claimant.
    ComputingElsewhere,
    /// A finished entry already exists; its result is returned alongside.
    Finished { result: Value },
}

/// A SQLite-backed store of entries and dependency edges.
///
/// One connection is held behind a mutex: SQLite connections are not safe to
/// share across threads without serializing access, and a single process
/// talking to one on-disk (or in-memory) database is the expected shape here
/// — cross-process coordination goes through the database file itself, not
/// through this struct.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Store").finish_non_exhaustive()
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    entry_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL,
    version       INTEGER NOT NULL,
    config_key    TEXT NOT NULL,
    replica       INTEGER NOT NULL,
    config        TEXT NOT NULL,
    result        TEXT,
    created_date  INTEGER NOT NULL,
    finished_date INTEGER,
    run_info      TEXT NOT NULL DEFAULT '{}',
    UNIQUE(name, version, config_key, replica)
);
CREATE TABLE IF NOT EXISTS deps (
    source_id INTEGER NOT NULL REFERENCES entries(entry_id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES entries(entry_id) ON DELETE CASCADE,
    UNIQUE(source_id, target_id)
);
";

impl Store {
    /// Opens (creating if absent) a SQLite database at `path` and ensures the
    /// schema exists, with a default 5-second busy timeout. Pass `:memory:`
    /// for an ephemeral, process-local store.
    #[tracing::instrument(skip_all, fields(path = %path))]
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::open_with_busy_timeout(path, 5_000)
    }

    /// Opens a store as [`Store::open`] does, but with an explicit busy
    /// timeout in milliseconds (see [`crate::runtime::RuntimeConfig`]).
    #[tracing::instrument(skip_all, fields(path = %path, busy_timeout_ms))]
    pub fn open_with_busy_timeout(path: &str, busy_timeout_ms: u32) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::new("opening database", e))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_with_busy_timeout(busy_timeout_ms)?;
        Ok(store)
    }

    /// Creates the schema if it does not already exist, with the default
    /// busy timeout. Idempotent.
    pub fn init(&self) -> Result<(), StoreError> {
        self.init_with_busy_timeout(5_000)
    }

    fn init_with_busy_timeout(&self, busy_timeout_ms: u32) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::new("enabling foreign keys", e))?;
        conn.pragma_update(None, "busy_timeout", busy_timeout_ms)
            .map_err(|e| StoreError::new("setting busy_timeout", e))?;
        conn.execute_batch(SCHEMA).map_err(|e| StoreError::new("creating schema", e))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetches an entry by `entry_id` if the ref already has one bound,
    /// otherwise by `(name, version, config_key, replica)`.
    pub fn read_entry(&self, r: &Ref) -> Result<Option<Entry>, StoreError> {
        let conn = self.lock();
        if let Some(entry_id) = r.entry_id() {
            return read_entry_by_id(&conn, entry_id);
        }
        read_entry_by_tuple_key(&conn, r)
    }

    /// Fetches only the result payload of an entry, if finished.
    pub fn read_result(&self, r: &Ref) -> Result<Option<Value>, StoreError> {
        Ok(self.read_entry(r)?.and_then(|e| e.result))
    }

    /// Enumerates all entries registered under `name`, as refs.
    #[tracing::instrument(skip(self))]
    pub fn read_refs(&self, name: &'static str) -> Result<Vec<Ref>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT entry_id, version, replica, config FROM entries WHERE name = ?1")
            .map_err(|e| StoreError::new("preparing read_refs query", e))?;
        let rows = stmt
            .query_map(params![name], |row| {
                let entry_id: i64 = row.get(0)?;
                let version: i64 = row.get(1)?;
                let replica: i64 = row.get(2)?;
                let config_text: String = row.get(3)?;
                Ok((entry_id, version, replica, config_text))
            })
            .map_err(|e| StoreError::new("running read_refs query", e))?;

        let mut refs = Vec::new();
        for row in rows {
            let (entry_id, version, replica, config_text) =
                row.map_err(|e| StoreError::new("reading read_refs row", e))?;
            let config = decode_json_text(&config_text)?;
            let r = Ref::with_options(
                name,
                version as u32,
                config,
                RefOptions {
                    replica: replica as u32,
                    check_ephemeral: false,
                },
            )
            .map_err(|e| StoreError::new("reconstructing ref", anyhow::anyhow!("{e}")))?;
            r.bind_entry_id(entry_id);
            refs.push(r);
        }
        Ok(refs)
    }

    /// The atomic claim primitive: announces `r` if absent, otherwise reports
    /// whether it is being computed elsewhere or is already finished.
    #[tracing::instrument(skip(self), fields(r = %r))]
    pub fn get_or_announce_entry(&self, r: &Ref) -> Result<(ClaimStatus, i64), StoreError> {
        let conn = self.lock();
        let config_text = serde_json::to_string(&codec::encode(r.stable_config()))
            .map_err(|e| StoreError::new("encoding config", e))?;
        let now = now_secs();

        let insert = conn.execute(
            "INSERT INTO entries (name, version, config_key, replica, config, created_date, finished_date, run_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, '{}')",
            params![r.name(), r.version(), r.config_key().as_str(), r.replica(), config_text, now as i64],
        );

        match insert {
            Ok(_) => {
                let entry_id = conn.last_insert_rowid();
                r.bind_entry_id(entry_id);
                tracing::debug!(entry_id, "announced new entry, compute here");
                Ok((ClaimStatus::ComputeHere, entry_id))
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let row = conn
                    .query_row(
                        "SELECT entry_id, finished_date, result FROM entries
                         WHERE name = ?1 AND version = ?2 AND config_key = ?3 AND replica = ?4",
                        params![r.name(), r.version(), r.config_key().as_str(), r.replica()],
                        |row| {
                            let entry_id: i64 = row.get(0)?;
                            let finished_date: Option<i64> = row.get(1)?;
                            let result: Option<String> = row.get(2)?;
                            Ok((entry_id, finished_date, result))
                        },
                    )
                    .map_err(|e| StoreError::new("reading existing entry after conflict", e))?;
                let (entry_id, finished_date, result) = row;
                r.bind_entry_id(entry_id);
                match finished_date {
                    None => {
                        tracing::debug!(entry_id, "entry already announced, computing elsewhere");
                        Ok((ClaimStatus::ComputingElsewhere, entry_id))
                    }
                    Some(_) => {
                        let result = decode_json_text(&result.expect("finished entry must have a result"))?;
                        tracing::debug!(entry_id, "entry already finished");
                        Ok((ClaimStatus::Finished { result }, entry_id))
                    }
                }
            }
            Err(e) => Err(StoreError::new("announcing entry", e)),
        }
    }

    /// Transitions an announced entry to finished, writing its result,
    /// run-info, and dependency edges atomically.
    #[tracing::instrument(skip(self, result, run_info, deps))]
    pub fn finish_entry(
        &self,
        entry_id: i64,
        result: &Value,
        run_info: &Value,
        deps: &[i64],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::new("starting finish_entry transaction", e))?;

        let result_text = serde_json::to_string(&codec::encode(result))
            .map_err(|e| StoreError::new("encoding result", e))?;
        let run_info_text = serde_json::to_string(&codec::encode(run_info))
            .map_err(|e| StoreError::new("encoding run_info", e))?;
        let now = now_secs();

        let updated = tx
            .execute(
                "UPDATE entries SET result = ?1, finished_date = ?2, run_info = ?3
                 WHERE entry_id = ?4 AND finished_date IS NULL",
                params![result_text, now as i64, run_info_text, entry_id],
            )
            .map_err(|e| StoreError::new("finishing entry", e))?;
        if updated == 0 {
            return Err(StoreError::new(
                "finishing entry",
                anyhow::anyhow!("entry {entry_id} is not announced"),
            ));
        }

        for &dep in deps {
            tx.execute(
                "INSERT OR IGNORE INTO deps (source_id, target_id) VALUES (?1, ?2)",
                params![dep, entry_id],
            )
            .map_err(|e| StoreError::new("writing dependency edge", e))?;
        }

        tx.commit().map_err(|e| StoreError::new("committing finish_entry", e))?;
        tracing::debug!(entry_id, dep_count = deps.len(), "entry finished");
        Ok(())
    }

    /// Deletes an announced entry. No-op if the entry is gone or already finished.
    #[tracing::instrument(skip(self))]
    pub fn cancel_entry(&self, entry_id: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM entries WHERE entry_id = ?1 AND finished_date IS NULL",
                params![entry_id],
            )
            .map_err(|e| StoreError::new("cancelling entry", e))?;
        if deleted > 0 {
            tracing::warn!(entry_id, "cancelled announced entry");
        }
        Ok(())
    }

    /// Deletes a finished entry and cascades to its transitive consumers.
    #[tracing::instrument(skip(self))]
    pub fn remove_entry(&self, r: &Ref) -> Result<(), StoreError> {
        let Some(entry) = self.read_entry(r)? else {
            return Ok(());
        };
        let conn = self.lock();
        let mut ids = consumer_closure(&conn, entry.entry_id)?;
        ids.push(entry.entry_id);

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM entries WHERE entry_id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params.as_slice())
            .map_err(|e| StoreError::new("removing entry and consumers", e))?;
        tracing::warn!(entry_id = entry.entry_id, removed = ids.len(), "removed entry cascade");
        Ok(())
    }

    /// Returns the transitive closure of consumers of `r` (entries that
    /// depend on it, directly or indirectly), as refs.
    pub fn recursive_consumers(&self, r: &Ref) -> Result<Vec<Ref>, StoreError> {
        let Some(entry) = self.read_entry(r)? else {
            return Ok(Vec::new());
        };
        let conn = self.lock();
        let ids = consumer_closure(&conn, entry.entry_id)?;
        let mut refs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = read_entry_by_id(&conn, id)? {
                refs.push(entry_to_ref(&e)?);
            }
        }
        Ok(refs)
    }
}

fn consumer_closure(conn: &Connection, root: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn
        .prepare(
            "WITH RECURSIVE closure(id) AS (
                 SELECT target_id FROM deps WHERE source_id = ?1
                 UNION
                 SELECT deps.target_id FROM deps JOIN closure ON deps.source_id = closure.id
             )
             SELECT id FROM closure",
        )
        .map_err(|e| StoreError::new("preparing consumer closure query", e))?;
    let rows = stmt
        .query_map(params![root], |row| row.get::<_, i64>(0))
        .map_err(|e| StoreError::new("running consumer closure query", e))?;
    rows.collect::<Result<_, _>>()
        .map_err(|e| StoreError::new("reading consumer closure rows", e))
}

fn entry_to_ref(entry: &Entry) -> Result<Ref, StoreError> {
    // The name is leaked once to satisfy `Ref`'s `&'static str`; acceptable
    // for the rare "reconstruct a ref purely from the store" path, same
    // tradeoff `store::codec` makes for nested refs inside stored values.
    let name: &'static str = Box::leak(entry.name.clone().into_boxed_str());
    let r = Ref::with_options(
        name,
        entry.version,
        entry.config.clone(),
        RefOptions {
            replica: entry.replica,
            check_ephemeral: false,
        },
    )
    .map_err(|e| StoreError::new("reconstructing ref from entry", anyhow::anyhow!("{e}")))?;
    r.bind_entry_id(entry.entry_id);
    Ok(r)
}

fn read_entry_by_id(conn: &Connection, entry_id: i64) -> Result<Option<Entry>, StoreError> {
    conn.query_row(
        "SELECT entry_id, name, version, config_key, replica, config, result, created_date, finished_date, run_info
         FROM entries WHERE entry_id = ?1",
        params![entry_id],
        row_to_entry,
    )
    .optional()
    .map_err(|e| StoreError::new("reading entry by id", e))?
    .transpose()
}

fn read_entry_by_tuple_key(conn: &Connection, r: &Ref) -> Result<Option<Entry>, StoreError> {
    conn.query_row(
        "SELECT entry_id, name, version, config_key, replica, config, result, created_date, finished_date, run_info
         FROM entries WHERE name = ?1 AND version = ?2 AND config_key = ?3 AND replica = ?4",
        params![r.name(), r.version(), r.config_key().as_str(), r.replica()],
        row_to_entry,
    )
    .optional()
    .map_err(|e| StoreError::new("reading entry by tuple key", e))?
    .transpose()
}

#[allow(clippy::type_complexity)]
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Entry, StoreError>> {
    let entry_id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    let version: i64 = row.get(2)?;
    let config_key: String = row.get(3)?;
    let replica: i64 = row.get(4)?;
    let config_text: String = row.get(5)?;
    let result_text: Option<String> = row.get(6)?;
    let created_date: i64 = row.get(7)?;
    let finished_date: Option<i64> = row.get(8)?;
    let run_info_text: String = row.get(9)?;

    Ok((|| {
        let config = decode_json_text(&config_text)?;
        let result = result_text.as_deref().map(decode_json_text).transpose()?;
        let run_info = decode_json_text(&run_info_text)?;
        Ok(Entry {
            entry_id,
            name,
            version: version as u32,
            config_key: ConfigKey::from(config_key),
            replica: replica as u32,
            config,
            result,
            created_date: created_date as u64,
            finished_date: finished_date.map(|d| d as u64),
            run_info,
        })
    })())
}

fn decode_json_text(text: &str) -> Result<Value, StoreError> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|e| StoreError::new("parsing stored JSON", e))?;
    codec::decode(&parsed).map_err(|e| StoreError::new("decoding stored value", anyhow::anyhow!("{e}")))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}
