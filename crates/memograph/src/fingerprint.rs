//! Canonical, stable fingerprinting of configuration values.
//!
//! The fingerprint must be stable across processes and independent of the
//! native iteration order of mappings, so keys are sorted by their
//! *serialized* form rather than by any ordering intrinsic to `Value` itself.
//! That single rule is what lets mixed-type and even nested-mapping keys be
//! ordered consistently (see [`canonicalize`]).

use sha2::{Digest, Sha224};

use crate::error::InvalidConfigKind;
use crate::value::{Opaque, Value};

/// A 56-character hex-encoded SHA-224 digest of a configuration's canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey(String);

impl ConfigKey {
    /// Returns the digest as a hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for ConfigKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConfigKey {
    /// Wraps an already-computed digest, e.g. one read back from storage.
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

/// A key is ephemeral (excluded from fingerprinting, merged into call
/// arguments at invocation time) if its string form starts with `__`.
pub(crate) fn is_ephemeral_key(key: &Value) -> bool {
    matches!(key, Value::String(s) if s.starts_with("__"))
}

/// Computes the fingerprint of a configuration's stable part.
///
/// Fails with [`InvalidConfigKind`] if `config`, or any value nested within
/// it, is a [`Value::Ref`] — refs are not part of the configuration grammar,
/// only of the broader value grammar the [ref walker](crate::walker) walks.
pub fn fingerprint(config: &Value) -> Result<ConfigKey, InvalidConfigKind> {
    let bytes = canonicalize(config)?;
    let mut hasher = Sha224::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    Ok(ConfigKey(hex_encode(&digest)))
}

/// Produces the canonical serialization of a configuration's stable part.
///
/// Exposed primarily so fingerprint stability can be tested directly against
/// the serialization rules, rather than only against opaque hash output.
pub fn canonicalize(config: &Value) -> Result<Vec<u8>, InvalidConfigKind> {
    let mut out = Vec::new();
    write_canonical(config, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), InvalidConfigKind> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::Float(f) => out.extend_from_slice(format_float(*f).as_bytes()),
        Value::String(s) => write_quoted_string(s, out),
        Value::Seq(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Map(pairs) => write_canonical_map(pairs, out)?,
        Value::Opaque(obj) => write_opaque(obj, out),
        Value::Ref(_) => {
            return Err(InvalidConfigKind {
                reason: "a ref cannot appear inside a configuration tree".to_owned(),
            });
        }
    }
    Ok(())
}

fn write_canonical_map(pairs: &[(Value, Value)], out: &mut Vec<u8>) -> Result<(), InvalidConfigKind> {
    let mut encoded = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        let key_bytes = encode_map_key(key)?;
        let mut value_bytes = Vec::new();
        write_canonical(value, &mut value_bytes)?;
        encoded.push((key_bytes, value_bytes));
    }
    encoded.sort_by(|(a, _), (b, _)| a.cmp(b));

    out.push(b'{');
    for (i, (key_bytes, value_bytes)) in encoded.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(key_bytes);
        out.push(b':');
        out.extend_from_slice(value_bytes);
    }
    out.push(b'}');
    Ok(())
}

/// Encodes a mapping key for sorting and inclusion in the canonical form.
///
/// Scalar keys are encoded the same way they would be as values. Non-scalar
/// keys (nested sequences/mappings) are prefixed with `~` and encoded via
/// recursive fingerprinting, so that sort order stays well-defined and
/// bounded in size regardless of key complexity.
fn encode_map_key(key: &Value) -> Result<Vec<u8>, InvalidConfigKind> {
    match key {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Opaque(_) => {
            let mut bytes = Vec::new();
            write_canonical(key, &mut bytes)?;
            Ok(bytes)
        }
        Value::Seq(_) | Value::Map(_) => {
            let inner = fingerprint(key)?;
            let mut bytes = vec![b'~'];
            bytes.extend_from_slice(inner.as_str().as_bytes());
            Ok(bytes)
        }
        Value::Ref(_) => Err(InvalidConfigKind {
            reason: "a ref cannot appear as a configuration mapping key".to_owned(),
        }),
    }
}

fn write_opaque(obj: &Opaque, out: &mut Vec<u8>) {
    out.push(b'<');
    out.extend_from_slice(obj.class_name.as_bytes());
    out.push(b' ');
    out.extend_from_slice(obj.canonical_key.as_bytes());
    out.push(b'>');
}

fn write_quoted_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Formats a float so that `1.0` and `1` never collide in canonical form,
/// and so the same bit pattern always serializes the same way.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}


#[cfg(test)]
mod prop_tests {
    use proptest::prelude::*;

    use super::*;

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    fn config_tree() -> impl Strategy<Value = Value> {
        scalar().prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Seq),
                proptest::collection::vec(("[a-z]{1,8}".prop_map(Value::String), inner), 0..8)
                    .prop_map(Value::Map),
            ]
        })
    }

    /// Deterministically reorders every mapping in `value` using `seed`,
    /// without changing which key/value pairs are present.
    fn shuffled(value: Value, seed: u64) -> Value {
        match value {
            Value::Map(mut pairs) => {
                let mut state = seed.wrapping_add(1);
                for i in (1..pairs.len()).rev() {
                    state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    let j = (state >> 33) as usize % (i + 1);
                    pairs.swap(i, j);
                }
                Value::Map(
                    pairs
                        .into_iter()
                        .map(|(k, v)| (shuffled(k, seed), shuffled(v, seed)))
                        .collect(),
                )
            }
            Value::Seq(items) => Value::Seq(items.into_iter().map(|v| shuffled(v, seed)).collect()),
            other => other,
        }
    }

    proptest! {
        /// P1: reordering every mapping's entries never changes the fingerprint.
        #[test]
        fn key_order_never_affects_fingerprint(config in config_tree(), seed: u64) {
            let reordered = shuffled(config.clone(), seed);
            prop_assert_eq!(fingerprint(&config).unwrap(), fingerprint(&reordered).unwrap());
        }

        /// P2: changing a single leaf changes the fingerprint.
        #[test]
        fn differing_leaf_changes_fingerprint(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let config_a = Value::map([(Value::str("x"), Value::Int(a))]);
            let config_b = Value::map([(Value::str("x"), Value::Int(b))]);
            prop_assert_ne!(fingerprint(&config_a).unwrap(), fingerprint(&config_b).unwrap());
        }
    }
}
