//! Process-local mapping from computation name to descriptor.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::ComputationError;
use crate::value::Value;

/// A registered pure function: takes the merged (stable ∪ ephemeral) call
/// arguments and returns a result or a [`ComputationError`].
pub type ComputationFn = Arc<dyn Fn(Value) -> Result<Value, ComputationError> + Send + Sync>;

/// Everything the runtime needs to know about a registered computation.
///
/// The general positional/keyword argument binder implied by a descriptor's
/// "arg-spec" is the external argument-binding layer out of scope for this
/// crate (see the crate's top-level docs); by the time a descriptor is
/// invoked, its caller has already produced the merged [`Value::Map`] this
/// function expects.
#[derive(Clone)]
pub struct ComputationDescriptor {
    name: &'static str,
    version: u32,
    func: ComputationFn,
}

impl ComputationDescriptor {
    /// Creates a descriptor for a named, versioned computation.
    pub fn new(
        name: &'static str,
        version: u32,
        func: impl Fn(Value) -> Result<Value, ComputationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            version,
            func: Arc::new(func),
        }
    }

    /// The computation's public name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The computation's version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Invokes the underlying function with already-bound arguments.
    pub fn invoke(&self, args: Value) -> Result<Value, ComputationError> {
        (self.func)(args)
    }
}

impl fmt::Debug for ComputationDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ComputationDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A process-local registry of computations, keyed by name.
#[derive(Default)]
pub struct Registry {
    descriptors: Mutex<HashMap<&'static str, ComputationDescriptor>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a computation, replacing any previous registration under
    /// the same name.
    pub fn register(&self, descriptor: ComputationDescriptor) {
        let mut map = self.descriptors.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(descriptor.name(), descriptor);
    }

    /// Looks up a computation by name.
    pub fn get(&self, name: &str) -> Option<ComputationDescriptor> {
        let map = self.descriptors.lock().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    /// Clears all registrations. Intended for test isolation between cases
    /// that register conflicting computations under the same name.
    pub fn reset(&self) {
        let mut map = self.descriptors.lock().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.descriptors.lock().unwrap_or_else(|e| e.into_inner());
        formatter.debug_struct("Registry").field("names", &map.keys().collect::<Vec<_>>()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = Registry::new();
        registry.register(ComputationDescriptor::new("double", 1, |args| match args {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            _ => unreachable!(),
        }));

        let descriptor = registry.get("double").unwrap();
        assert_eq!(descriptor.version(), 1);
        assert_eq!(descriptor.invoke(Value::Int(21)).unwrap(), Value::Int(42));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn reset_clears_registrations() {
        let registry = Registry::new();
        registry.register(ComputationDescriptor::new("f", 1, |_| Ok(Value::Null)));
        registry.reset();
        assert!(registry.get("f").is_none());
    }

    #[test]
    fn re_registering_replaces_descriptor() {
        let registry = Registry::new();
        registry.register(ComputationDescriptor::new("f", 1, |_| Ok(Value::Int(1))));
        registry.register(ComputationDescriptor::new("f", 2, |_| Ok(Value::Int(2))));
        let descriptor = registry.get("f").unwrap();
        assert_eq!(descriptor.version(), 2);
    }
}
