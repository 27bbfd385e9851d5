//! Immutable handles identifying a computation instance.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use crate::error::InvalidConfigKind;
use crate::fingerprint::{self, ConfigKey};
use crate::value::Value;

/// Options controlling [`Ref`] construction.
#[derive(Debug, Clone, Copy)]
pub struct RefOptions {
    /// Disambiguates multiple independent entries of identical configuration
    /// (e.g. non-deterministic sampling computations).
    pub replica: u32,
    /// Whether to partition `config` into stable/ephemeral parts by
    /// `__`-prefixed keys. Disable only when the caller has already done
    /// this partitioning itself.
    pub check_ephemeral: bool,
}

impl Default for RefOptions {
    fn default() -> Self {
        Self {
            replica: 0,
            check_ephemeral: true,
        }
    }
}

/// An immutable handle identifying one computation instance:
/// `(name, version, stable_config, replica, config_key, ephemeral_config, entry_id?)`.
///
/// Equality and hashing use only `(name, version, config_key, replica)` — the
/// tuple key — never the configuration payload itself, so two refs built
/// from differently-ordered but value-equal configurations compare equal.
#[derive(Debug, Clone)]
pub struct Ref {
    name: &'static str,
    version: u32,
    stable_config: Value,
    replica: u32,
    config_key: ConfigKey,
    ephemeral_config: Value,
    entry_id: OnceLock<i64>,
}

/// `(name, config_key, version, replica)`, the store's unique index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleKey {
    pub name: &'static str,
    pub config_key: ConfigKey,
    pub version: u32,
    pub replica: u32,
}

impl Ref {
    /// Constructs a ref with default options (replica 0, ephemeral keys stripped).
    pub fn new(name: &'static str, version: u32, config: Value, replica: u32) -> Result<Self, InvalidConfigKind> {
        Self::with_options(
            name,
            version,
            config,
            RefOptions {
                replica,
                ..RefOptions::default()
            },
        )
    }

    /// Constructs a ref with explicit options.
    pub fn with_options(
        name: &'static str,
        version: u32,
        config: Value,
        options: RefOptions,
    ) -> Result<Self, InvalidConfigKind> {
        let (stable_config, ephemeral_config) = if options.check_ephemeral {
            partition_ephemeral(config)
        } else {
            (config, Value::map([]))
        };
        let config_key = fingerprint::fingerprint(&stable_config)?;
        Ok(Self {
            name,
            version,
            stable_config,
            replica: options.replica,
            config_key,
            ephemeral_config,
            entry_id: OnceLock::new(),
        })
    }

    /// The computation name this ref points to.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The version of the computation this ref was constructed against.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The replica index.
    pub fn replica(&self) -> u32 {
        self.replica
    }

    /// The fingerprint of the stable configuration.
    pub fn config_key(&self) -> &ConfigKey {
        &self.config_key
    }

    /// The stable (fingerprinted) configuration.
    pub fn stable_config(&self) -> &Value {
        &self.stable_config
    }

    /// The ephemeral configuration, merged into call arguments but excluded
    /// from fingerprinting.
    pub fn ephemeral_config(&self) -> &Value {
        &self.ephemeral_config
    }

    /// The entry id this ref resolved to, if it has been resolved against a store.
    pub fn entry_id(&self) -> Option<i64> {
        self.entry_id.get().copied()
    }

    /// Binds the entry id this ref resolved to. Idempotent: binding the same
    /// id twice is a no-op; binding a second, different id is a logic error
    /// and panics, since a ref's identity implies a single entry.
    pub(crate) fn bind_entry_id(&self, entry_id: i64) {
        match self.entry_id.set(entry_id) {
            Ok(()) => {}
            Err(_) => assert_eq!(
                self.entry_id.get().copied(),
                Some(entry_id),
                "ref {self} was bound to conflicting entry ids"
            ),
        }
    }

    /// The indexing tuple used for equality, hashing, and store lookups.
    pub fn tuple_key(&self) -> TupleKey {
        TupleKey {
            name: self.name,
            config_key: self.config_key.clone(),
            version: self.version,
            replica: self.replica,
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}/v{}[{}]#{}",
            self.name,
            self.version,
            &self.config_key.as_str()[..12],
            self.replica
        )
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.tuple_key() == other.tuple_key()
    }
}

impl Eq for Ref {}

impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tuple_key().hash(state);
    }
}

/// Splits `config` into `(stable, ephemeral)` by `__`-prefixed string keys at
/// the top level of a mapping. Non-mapping configs have no ephemeral part.
fn partition_ephemeral(config: Value) -> (Value, Value) {
    match config {
        Value::Map(pairs) => {
            let mut stable = Vec::new();
            let mut ephemeral = Vec::new();
            for (key, value) in pairs {
                if fingerprint::is_ephemeral_key(&key) {
                    ephemeral.push((key, value));
                } else {
                    stable.push((key, value));
                }
            }
            (Value::Map(stable), Value::Map(ephemeral))
        }
        other => (other, Value::map([])),
    }
}
