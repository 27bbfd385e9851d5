//! Crate error taxonomy.
//!
//! Each concern gets its own error type with a hand-written [`fmt::Display`]
//! and [`std::error::Error`] impl, in the style of the config-parsing errors
//! this crate grew out of: no single catch-all error, and backend errors
//! (SQLite, serialization) are wrapped rather than leaked across the public
//! API.

use std::fmt;

use crate::refs::Ref;

/// A configuration tree contains a value outside the allowed grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidConfigKind {
    /// Human-readable description of what was found and where.
    pub reason: String,
}

impl fmt::Display for InvalidConfigKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "invalid configuration: {}", self.reason)
    }
}

impl std::error::Error for InvalidConfigKind {}

/// Errors raised while walking a value tree for embedded [`Ref`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    /// The value nests deeper than the walker's recursion budget allows.
    TooDeep {
        /// The configured maximum depth that was exceeded.
        max_depth: usize,
    },
    /// [`crate::walker::substitute`] was asked to substitute a ref for which
    /// no replacement value was provided.
    UnresolvedRef(Ref),
}

impl fmt::Display for WalkError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooDeep { max_depth } => {
                write!(formatter, "value nests deeper than the recursion budget ({max_depth})")
            }
            Self::UnresolvedRef(r) => {
                write!(formatter, "no substitution provided for ref {r}")
            }
        }
    }
}

impl std::error::Error for WalkError {}

/// Errors surfaced by a [`crate::store::Store`] implementation.
#[derive(Debug)]
pub struct StoreError {
    context: String,
    source: anyhow::Error,
}

impl StoreError {
    pub(crate) fn new(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            context: context.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "store error while {}: {}", self.context, self.source)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Errors from misuse of the context-local current-runtime / current-task bindings.
///
/// Scope-guard nesting violations (`RuntimeGuard`/`TaskGuard` dropped out of
/// the order they were entered) are not represented here: a `Drop` impl
/// cannot fail gracefully, so that misuse panics at the drop site instead,
/// the same contract `std::cell::RefMut` and `std::sync::MutexGuard` make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// A free function or nested computation tried to reach the current
    /// runtime, but none is bound on this thread.
    NoCurrentRuntime,
}

impl fmt::Display for ContextError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::NoCurrentRuntime => "no runtime is bound on the current thread",
        })
    }
}

impl std::error::Error for ContextError {}

/// The error type a registered computation function returns on failure.
///
/// Opaque by design: the runtime only needs to cancel the announced entry
/// and propagate the cause, not inspect it.
pub type ComputationError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by [`crate::runtime::Runtime`] orchestration.
#[derive(Debug)]
pub enum RuntimeError {
    /// A [`Ref`] names a computation that was never registered.
    UnknownComputation {
        /// The unregistered computation name.
        name: String,
    },
    /// `get_or_announce_entry` reported the entry is being computed by
    /// another runtime; this runtime does not wait.
    ConcurrentComputation {
        /// The ref that is already being computed elsewhere.
        r: Ref,
    },
    /// The registered function for a ref raised an error; the entry was
    /// cancelled before this error propagated.
    ComputationFailed {
        /// The ref whose computation failed.
        r: Ref,
        /// The original cause.
        source: ComputationError,
    },
    /// The configuration embedded in a ref failed fingerprinting.
    InvalidConfig(InvalidConfigKind),
    /// Walking or substituting the caller's object failed.
    Walk(WalkError),
    /// The backing store reported an error.
    Store(StoreError),
    /// The current-runtime / current-task context was misused.
    Context(ContextError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownComputation { name } => {
                write!(formatter, "no computation is registered under the name '{name}'")
            }
            Self::ConcurrentComputation { r } => {
                write!(formatter, "{r} is already being computed by another runtime")
            }
            Self::ComputationFailed { r, source } => {
                write!(formatter, "computation {r} failed: {source}")
            }
            Self::InvalidConfig(err) => write!(formatter, "{err}"),
            Self::Walk(err) => write!(formatter, "{err}"),
            Self::Store(err) => write!(formatter, "{err}"),
            Self::Context(err) => write!(formatter, "{err}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ComputationFailed { source, .. } => Some(source.as_ref()),
            Self::InvalidConfig(err) => Some(err),
            Self::Walk(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Context(err) => Some(err),
            Self::UnknownComputation { .. } | Self::ConcurrentComputation { .. } => None,
        }
    }
}

impl From<InvalidConfigKind> for RuntimeError {
    fn from(err: InvalidConfigKind) -> Self {
        Self::InvalidConfig(err)
    }
}

impl From<WalkError> for RuntimeError {
    fn from(err: WalkError) -> Self {
        Self::Walk(err)
    }
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<ContextError> for RuntimeError {
    fn from(err: ContextError) -> Self {
        Self::Context(err)
    }
}
