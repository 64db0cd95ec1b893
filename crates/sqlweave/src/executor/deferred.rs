use crate::cache::{CacheEntry, CacheKey, LocalCache};
use crate::error::WeaveResult;
use crate::object::{ObjectFactory, ObjectRef};
use serde_json::Value;

/// The shape a deferred load assigns into its owner's property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The first cached row (or null when the nested query was empty).
    Scalar,
    /// The whole cached list.
    List,
}

/// A pending assignment of a nested-query result into a parent object,
/// resolved once the top-level query's cache is guaranteed complete.
#[derive(Debug)]
pub struct DeferredLoad {
    pub(crate) owner: ObjectRef,
    pub(crate) property: String,
    pub(crate) key: CacheKey,
    pub(crate) target: TargetKind,
}

impl DeferredLoad {
    pub(crate) fn new(
        owner: ObjectRef,
        property: impl Into<String>,
        key: CacheKey,
        target: TargetKind,
    ) -> Self {
        Self {
            owner,
            property: property.into(),
            key,
            target,
        }
    }

    /// Whether the cache already holds a materialized list for this key.
    pub(crate) fn can_load(&self, cache: &LocalCache) -> bool {
        matches!(cache.get(&self.key), Some(CacheEntry::Ready(_)))
    }

    /// Assign the cached result into the owner. A key that is absent or
    /// still building assigns nothing; the cache is never touched.
    pub(crate) fn load(&self, cache: &LocalCache, factory: &dyn ObjectFactory) -> WeaveResult<()> {
        let rows = match cache.ready(&self.key) {
            Some(rows) => rows,
            None => return Ok(()),
        };
        let value = match self.target {
            TargetKind::Scalar => rows.first().cloned().unwrap_or(Value::Null),
            TargetKind::List => Value::Array(rows.as_ref().clone()),
        };
        self.owner.set_with(&self.property, value, factory)
    }
}
