//! Configuration and result value model.

use std::fmt;

use crate::refs::Ref;

/// A domain object that is not itself serializable but exposes a canonical
/// string key for identity and fingerprinting purposes.
///
/// This is the Rust expression of "opaque objects exposing a canonical key"
/// from the configuration grammar: the fingerprinter never inspects the
/// object's real fields, only `class_name` and `canonical_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    /// Name used in the `<ClassName canonical-string>` fingerprint encoding.
    pub class_name: String,
    /// The object's canonical, stable string identity.
    pub canonical_key: String,
}

impl Opaque {
    /// Creates a new opaque value.
    pub fn new(class_name: impl Into<String>, canonical_key: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            canonical_key: canonical_key.into(),
        }
    }
}

impl fmt::Display for Opaque {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "<{} {}>", self.class_name, self.canonical_key)
    }
}

/// A value flowing through the system: either a configuration leaf/container,
/// a [`Ref`] (a future handle to another computation's result), or an
/// [`Opaque`] domain object.
///
/// `Value` is deliberately one recursive sum type for both configurations
/// (the argument a computation is keyed on) and the general objects callers
/// pass to [`crate::runtime::Runtime::get_results`]: the two differ only in
/// that a well-formed configuration must not contain a [`Value::Ref`] node
/// anywhere in its tree (see [`crate::fingerprint::fingerprint`]).
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Ordered sequence.
    Seq(Vec<Value>),
    /// Unordered keyed mapping. Represented as a vector of pairs rather than
    /// a sorted map, since keys may themselves be arbitrary configurations
    /// (including nested maps) for which no total order is defined other
    /// than the one the fingerprinter imposes over serialized form.
    Map(Vec<(Value, Value)>),
    /// A domain object exposed through a canonical key.
    Opaque(Opaque),
    /// A handle to another computation, to be resolved by the runtime.
    Ref(Ref),
}

impl Value {
    /// Shorthand for building a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Shorthand for building a sequence value.
    pub fn seq(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Seq(items.into_iter().collect())
    }

    /// Shorthand for building a mapping value.
    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::Map(pairs.into_iter().collect())
    }

    /// Returns `true` if this value, or any value nested within it, is a [`Value::Ref`].
    pub fn contains_ref(&self) -> bool {
        match self {
            Self::Ref(_) => true,
            Self::Seq(items) => items.iter().any(Value::contains_ref),
            Self::Map(pairs) => pairs
                .iter()
                .any(|(k, v)| k.contains_ref() || v.contains_ref()),
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_) | Self::Opaque(_) => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Ref> for Value {
    fn from(value: Ref) -> Self {
        Self::Ref(value)
    }
}
