//! JSON encoding of [`Value`] for the store's `config`/`result` text columns.
//!
//! Scalars, sequences and mappings round-trip through plain JSON. [`Opaque`]
//! and [`Value::Ref`] nodes — which have no native JSON shape — are encoded
//! as single-key sentinel objects (`$opaque`, `$ref`) that cannot collide
//! with a user [`Value::Map`] unless the user's map itself uses a
//! single-entry `$opaque`/`$ref` key, which [`encode`] guards against by
//! always wrapping user maps as a `{"map": [[k, v], ...]}` pair list rather
//! than a native JSON object — mapping keys are not restricted to strings,
//! so a native object could not represent them losslessly regardless.

use serde_json::json;

use crate::refs::{Ref, RefOptions};
use crate::value::{Opaque, Value};

/// Encodes a [`Value`] as a [`serde_json::Value`] suitable for storage as text.
pub(crate) fn encode(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(n) => json!(n),
        Value::Float(f) => json!(f),
        Value::String(s) => json!(s),
        Value::Seq(items) => serde_json::Value::Array(items.iter().map(encode).collect()),
        Value::Map(pairs) => {
            let encoded_pairs: Vec<_> = pairs
                .iter()
                .map(|(k, v)| serde_json::Value::Array(vec![encode(k), encode(v)]))
                .collect();
            json!({ "map": encoded_pairs })
        }
        Value::Opaque(obj) => json!({
            "$opaque": { "class": obj.class_name, "key": obj.canonical_key }
        }),
        Value::Ref(r) => json!({
            "$ref": {
                "name": r.name(),
                "version": r.version(),
                "replica": r.replica(),
                "stable_config": encode(r.stable_config()),
            }
        }),
    }
}

/// Decodes a [`serde_json::Value`] previously produced by [`encode`].
pub(crate) fn decode(value: &serde_json::Value) -> Result<Value, String> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(format!("number {n} is out of range"))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) => {
            Ok(Value::Seq(items.iter().map(decode).collect::<Result<_, _>>()?))
        }
        serde_json::Value::Object(obj) => {
            if let Some(opaque) = obj.get("$opaque") {
                let class = opaque
                    .get("class")
                    .and_then(|v| v.as_str())
                    .ok_or("malformed $opaque: missing class")?;
                let key = opaque
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or("malformed $opaque: missing key")?;
                return Ok(Value::Opaque(Opaque::new(class, key)));
            }
            if let Some(r) = obj.get("$ref") {
                let name = r
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or("malformed $ref: missing name")?;
                // Computation names are registered as `&'static str`; a decoded
                // ref's name is leaked once to obtain that lifetime, mirroring
                // how the registry itself only ever holds `&'static str` keys.
                let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
                let version = r
                    .get("version")
                    .and_then(|v| v.as_u64())
                    .ok_or("malformed $ref: missing version")? as u32;
                let replica = r
                    .get("replica")
                    .and_then(|v| v.as_u64())
                    .ok_or("malformed $ref: missing replica")? as u32;
                let stable_config = r
                    .get("stable_config")
                    .map(decode)
                    .transpose()?
                    .ok_or("malformed $ref: missing stable_config")?;
                let reconstructed = Ref::with_options(
                    name,
                    version,
                    stable_config,
                    RefOptions {
                        replica,
                        check_ephemeral: false,
                    },
                )
                .map_err(|e| format!("malformed $ref: {e}"))?;
                return Ok(Value::Ref(reconstructed));
            }
            let pairs = obj
                .get("map")
                .and_then(|v| v.as_array())
                .ok_or("malformed map: missing pair list")?;
            let mut decoded_pairs = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let pair = pair.as_array().ok_or("malformed map: pair is not an array")?;
                let [k, v] = pair.as_slice() else {
                    return Err("malformed map: pair does not have exactly two elements".to_owned());
                };
                decoded_pairs.push((decode(k)?, decode(v)?));
            }
            Ok(Value::Map(decoded_pairs))
        }
    }
}
