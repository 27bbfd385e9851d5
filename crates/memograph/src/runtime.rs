//! Orchestrates claim/compute/finish over a set of refs and tracks the
//! transitive dependency graph a computation discovers as it runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::context::{self, RuntimeGuard};
use crate::error::{RuntimeError, StoreError};
use crate::refs::Ref;
use crate::registry::{ComputationDescriptor, Registry};
use crate::store::{ClaimStatus, Entry, Store};
use crate::value::Value;
use crate::walker;

/// Constructor options for a [`Runtime`], analogous to how a store of
/// configuration sources is assembled before a schema is parsed out of it.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the backing SQLite database, or `:memory:`.
    pub db_path: String,
    /// `PRAGMA busy_timeout` applied to the store's connection.
    pub busy_timeout_ms: u32,
    /// Reserved for a future statement-level timeout; recorded but not yet
    /// enforced, since `rusqlite` has no direct per-statement deadline.
    pub statement_timeout: Option<Duration>,
}

impl RuntimeConfig {
    /// Creates a config pointing at `db_path` with the default 5-second busy timeout.
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: 5_000,
            statement_timeout: None,
        }
    }

    /// Overrides the busy timeout.
    #[must_use]
    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u32) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Records a statement-level timeout for future enforcement.
    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

/// Orchestrates the claim/compute/finish protocol over a [`Store`], dispatching
/// to functions registered in a process-local [`Registry`].
///
/// A `Runtime` makes no use of parallel workers itself (§5 of the design:
/// single-threaded cooperative within one call); concurrency safety across
/// processes or threads comes entirely from the store's atomic claim.
#[derive(Debug)]
pub struct Runtime {
    store: Store,
    registry: Registry,
    registration_lock: Mutex<()>,
}

impl Runtime {
    /// Opens the backing store described by `config` and returns a runtime
    /// with an empty registry.
    #[tracing::instrument(skip_all, fields(db_path = %config.db_path))]
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        if let Some(timeout) = config.statement_timeout {
            tracing::debug!(?timeout, "statement-level timeout configured but not enforced by the SQLite backend");
        }
        let store = Store::open_with_busy_timeout(&config.db_path, config.busy_timeout_ms)?;
        Ok(Self {
            store,
            registry: Registry::new(),
            registration_lock: Mutex::new(()),
        })
    }

    /// Registers a computation, replacing any previous registration under the
    /// same name. Serialized behind a lock so start-up registration from
    /// multiple threads cannot interleave with a lookup mid-update.
    pub fn register(&self, descriptor: ComputationDescriptor) {
        let _guard = self.registration_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.registry.register(descriptor);
    }

    /// Direct access to the backing store, for callers that need the lower-level surface.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Binds this runtime as "current" for the lifetime of the returned guard
    /// (see [`crate::context`]), so free functions and nested computations
    /// can reach it without an explicit handle.
    pub fn enter(&self) -> RuntimeGuard<'_> {
        context::enter_runtime(self)
    }

    /// Returns `obj` with every embedded [`Ref`] replaced by its computed
    /// result, computing missing entries as a side effect.
    #[tracing::instrument(skip_all)]
    pub fn get_results(&self, obj: &Value) -> Result<Value, RuntimeError> {
        let refs = walker::collect_refs(obj)?;
        let mut mapping = HashMap::with_capacity(refs.len());
        for r in &refs {
            if mapping.contains_key(&r.tuple_key()) {
                continue;
            }
            let entry = self.resolve_one(r)?;
            mapping.insert(r.tuple_key(), entry.result.unwrap_or(Value::Null));
        }
        Ok(walker::substitute(obj, &mapping)?)
    }

    /// Like [`Runtime::get_results`], but substitutes full [`Entry`] records
    /// (projected into [`Value`]) instead of bare results.
    #[tracing::instrument(skip_all)]
    pub fn get_entries(&self, obj: &Value) -> Result<Value, RuntimeError> {
        let refs = walker::collect_refs(obj)?;
        let mut mapping = HashMap::with_capacity(refs.len());
        for r in &refs {
            if mapping.contains_key(&r.tuple_key()) {
                continue;
            }
            let entry = self.resolve_one(r)?;
            mapping.insert(r.tuple_key(), entry_to_value(&entry));
        }
        Ok(walker::substitute(obj, &mapping)?)
    }

    /// Read-only counterpart of [`Runtime::get_results`]: never computes,
    /// missing entries substitute as `null`.
    pub fn read_results(&self, obj: &Value) -> Result<Value, RuntimeError> {
        let refs = walker::collect_refs(obj)?;
        let mut mapping = HashMap::with_capacity(refs.len());
        for r in &refs {
            if mapping.contains_key(&r.tuple_key()) {
                continue;
            }
            let result = self.store.read_result(r)?.unwrap_or(Value::Null);
            mapping.insert(r.tuple_key(), result);
        }
        Ok(walker::substitute(obj, &mapping)?)
    }

    /// Read-only counterpart of [`Runtime::get_entries`]: never computes,
    /// missing entries substitute as `null`.
    pub fn read_entries(&self, obj: &Value) -> Result<Value, RuntimeError> {
        let refs = walker::collect_refs(obj)?;
        let mut mapping = HashMap::with_capacity(refs.len());
        for r in &refs {
            if mapping.contains_key(&r.tuple_key()) {
                continue;
            }
            let value = match self.store.read_entry(r)? {
                Some(entry) => entry_to_value(&entry),
                None => Value::Null,
            };
            mapping.insert(r.tuple_key(), value);
        }
        Ok(walker::substitute(obj, &mapping)?)
    }

    /// Enumerates all entries stored under `name`, as refs.
    pub fn read_refs(&self, name: &'static str) -> Result<Vec<Ref>, RuntimeError> {
        Ok(self.store.read_refs(name)?)
    }

    /// Claims `r` if absent, recording it as a dependency of the currently
    /// running task (if any), and resolves it to a finished [`Entry`] —
    /// computing it locally if this call is the one that won the claim.
    #[tracing::instrument(skip(self), fields(r = %r))]
    fn resolve_one(&self, r: &Ref) -> Result<Entry, RuntimeError> {
        let (status, entry_id) = self.store.get_or_announce_entry(r)?;
        context::record_dependency(entry_id);

        match status {
            ClaimStatus::Finished { .. } => self.expect_entry(r, "reading finished entry"),
            ClaimStatus::ComputingElsewhere => Err(RuntimeError::ConcurrentComputation { r: r.clone() }),
            ClaimStatus::ComputeHere => self.compute_here(r, entry_id),
        }
    }

    fn compute_here(&self, r: &Ref, entry_id: i64) -> Result<Entry, RuntimeError> {
        let guard = CancelGuard::new(&self.store, entry_id);

        let Some(descriptor) = self.registry.get(r.name()) else {
            return Err(RuntimeError::UnknownComputation { name: r.name().to_owned() });
        };
        let args = merge_call_args(r.stable_config(), r.ephemeral_config());

        let task_guard = context::enter_task(r.clone());
        let invoke_result = descriptor.invoke(args);
        let deps = context::current_task_dependencies();
        drop(task_guard);

        match invoke_result {
            Ok(result) => {
                // Cancellation is only the failure-path cleanup (I5); once
                // the function has succeeded the entry is the claimant's to
                // finish, and a failure to do so leaves it announced rather
                // than being silently cancelled out from under it.
                guard.disarm();
                self.store.finish_entry(entry_id, &result, &Value::map([]), &deps)?;
                self.expect_entry(r, "reading freshly finished entry")
            }
            Err(source) => {
                tracing::warn!(%r, "computation failed, cancelling entry");
                Err(RuntimeError::ComputationFailed { r: r.clone(), source })
            }
        }
    }

    fn expect_entry(&self, r: &Ref, what: &'static str) -> Result<Entry, RuntimeError> {
        self.store
            .read_entry(r)?
            .ok_or_else(|| RuntimeError::Store(StoreError::new(what, anyhow::anyhow!("entry for {r} vanished"))))
    }
}

/// Merges a ref's ephemeral configuration into its stable configuration to
/// form the keyword arguments a registered function is invoked with.
fn merge_call_args(stable: &Value, ephemeral: &Value) -> Value {
    match (stable, ephemeral) {
        (Value::Map(stable_pairs), Value::Map(ephemeral_pairs)) if !ephemeral_pairs.is_empty() => {
            let mut merged = stable_pairs.clone();
            merged.extend(ephemeral_pairs.iter().cloned());
            Value::Map(merged)
        }
        _ => stable.clone(),
    }
}

/// Projects an [`Entry`] into a [`Value::Map`] so it can flow through the
/// same [`walker::substitute`] as a bare result.
fn entry_to_value(entry: &Entry) -> Value {
    Value::map([
        (Value::str("entry_id"), Value::Int(entry.entry_id)),
        (Value::str("name"), Value::str(entry.name.clone())),
        (Value::str("version"), Value::Int(i64::from(entry.version))),
        (Value::str("config_key"), Value::str(entry.config_key.as_str())),
        (Value::str("replica"), Value::Int(i64::from(entry.replica))),
        (Value::str("result"), entry.result.clone().unwrap_or(Value::Null)),
        (Value::str("created_date"), Value::Int(i64::try_from(entry.created_date).unwrap_or(i64::MAX))),
        (
            Value::str("finished_date"),
            entry
                .finished_date
                .map(|d| Value::Int(i64::try_from(d).unwrap_or(i64::MAX)))
                .unwrap_or(Value::Null),
        ),
        (Value::str("run_info"), entry.run_info.clone()),
    ])
}

/// Cancels the entry it was built for when dropped, unless [`CancelGuard::disarm`]
/// was called first. A scope guard over a store mutation rather than a trace
/// span, but the same `entered()`/disarm-on-success shape.
struct CancelGuard<'a> {
    store: &'a Store,
    entry_id: i64,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    fn new(store: &'a Store, entry_id: i64) -> Self {
        Self { store, entry_id, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.store.cancel_entry(self.entry_id) {
                tracing::warn!(entry_id = self.entry_id, %err, "failed to cancel entry on guarded unwind");
            }
        }
    }
}
