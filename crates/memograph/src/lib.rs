//! Persistent computation-memoization runtime with dependency tracking.
//!
//! Register named, versioned pure functions ([`ComputationDescriptor`]) whose
//! arguments form a [`Value`] configuration tree. Invoking a computation
//! through a [`Ref`] and a [`Runtime`] yields a result keyed by
//! `(name, version, config fingerprint, replica)` in a [`Store`]; later
//! invocations with the same key return the stored result without
//! re-executing. Computations may transitively invoke other computations
//! through the current-runtime context; the runtime records the resulting
//! dependency graph so invalidating a node can cascade to its consumers.
//!
//! The surface API for binding a function's positional/keyword arguments
//! into a [`Value`] configuration, CLI or service wrappers, and a
//! distributed executor pool are external collaborators this crate does not
//! provide.

pub mod context;
pub mod error;
pub mod fingerprint;
pub mod refs;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod value;
pub mod walker;

pub use crate::error::{ComputationError, ContextError, InvalidConfigKind, RuntimeError, StoreError, WalkError};
pub use crate::fingerprint::ConfigKey;
pub use crate::refs::{Ref, RefOptions, TupleKey};
pub use crate::registry::{ComputationDescriptor, ComputationFn, Registry};
pub use crate::runtime::{Runtime, RuntimeConfig};
pub use crate::store::{ClaimStatus, Entry, Store};
pub use crate::value::{Opaque, Value};

/// Replaces every [`Ref`] embedded in `obj` with its computed result,
/// computing missing ones as a side effect, using whichever [`Runtime`] is
/// currently bound on this thread (see [`Runtime::enter`]).
///
/// # Errors
/// Returns [`ContextError::NoCurrentRuntime`](error::ContextError::NoCurrentRuntime)
/// wrapped in a [`RuntimeError::Context`] if no runtime is bound.
pub fn get_results(obj: &Value) -> Result<Value, RuntimeError> {
    context::with_current_runtime(|rt| rt.get_results(obj)).map_err(RuntimeError::from)?
}

/// Read-only counterpart of [`get_results`]: never computes, substituting
/// unresolved refs with `null`.
pub fn read_results(obj: &Value) -> Result<Value, RuntimeError> {
    context::with_current_runtime(|rt| rt.read_results(obj)).map_err(RuntimeError::from)?
}
