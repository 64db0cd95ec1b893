//! Shared object handles and object construction.
//!
//! Result mapping and nested-query resolution need reference semantics:
//! an out parameter replayed into the caller's parameter object, or a
//! deferred load assigning into a parent row, must be visible to whoever
//! else holds that object. [`ObjectRef`] is a cheap clonable handle over a
//! JSON value that provides exactly that, plus dotted-path access.

use crate::error::WeaveResult;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Constructs result objects and their intermediate containers.
///
/// Used when a property assignment has to materialize missing path
/// segments, and by result handling when a row container is needed.
pub trait ObjectFactory: Send + Sync {
    /// Create an empty object.
    fn create_object(&self) -> Value;

    /// Create an empty list.
    fn create_list(&self) -> Value;
}

/// The default factory: plain JSON objects and arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultObjectFactory;

impl ObjectFactory for DefaultObjectFactory {
    fn create_object(&self) -> Value {
        Value::Object(Map::new())
    }

    fn create_list(&self) -> Value {
        Value::Array(Vec::new())
    }
}

/// A clone-friendly, shared handle to a mutable value.
///
/// All executor entry points take parameters as `ObjectRef` so that output
/// parameters and deferred loads can write back into objects the caller
/// still holds. Cloning the handle shares the underlying value.
#[derive(Clone)]
pub struct ObjectRef(Arc<Mutex<Value>>);

impl ObjectRef {
    /// Wrap a value.
    pub fn new(value: Value) -> Self {
        ObjectRef(Arc::new(Mutex::new(value)))
    }

    /// A handle to a null value, for statements that take no parameters.
    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    /// Clone out the current value.
    pub fn snapshot(&self) -> Value {
        self.0.lock().unwrap().clone()
    }

    /// Whether two handles refer to the same underlying object.
    pub fn same_object(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read a dotted property path. Missing segments resolve to `Null`.
    pub fn get(&self, path: &str) -> Value {
        let guard = self.0.lock().unwrap();
        let mut current: &Value = &guard;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => v,
                    None => return Value::Null,
                },
                Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i))
                {
                    Some(v) => v,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            };
        }
        current.clone()
    }

    /// Write a dotted property path, creating intermediate containers with
    /// the default factory.
    pub fn set(&self, path: &str, value: Value) -> WeaveResult<()> {
        self.set_with(path, value, &DefaultObjectFactory)
    }

    /// Write a dotted property path, creating intermediate containers with
    /// the given factory.
    ///
    /// A non-object value at the root (or along the path) is replaced by a
    /// fresh container; assignment into a scalar cannot be expressed
    /// otherwise.
    pub fn set_with(
        &self,
        path: &str,
        value: Value,
        factory: &dyn ObjectFactory,
    ) -> WeaveResult<()> {
        let mut guard = self.0.lock().unwrap();
        let mut current: &mut Value = &mut guard;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !current.is_object() {
                *current = factory.create_object();
            }
            let map = current.as_object_mut().unwrap();
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return Ok(());
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| factory.create_object());
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectRef")
            .field(&*self.0.lock().unwrap())
            .finish()
    }
}
