use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Marker absorbed in place of a null component, distinct from not
/// absorbing anything at all.
const NULL_MARKER: u64 = 1;
const HASH_SEED: u64 = 17;
const HASH_MULTIPLIER: u64 = 37;

/// Value-equality identifier for a query invocation.
///
/// Built by successively absorbing components; each absorption updates a
/// running order-sensitive hash and appends to the component list used for
/// equality. The canonical composition is statement id, offset, limit, SQL
/// text, each positional parameter value, then the environment id.
#[derive(Debug, Clone)]
pub struct CacheKey {
    hash: u64,
    parts: Vec<Value>,
}

impl CacheKey {
    pub fn new() -> Self {
        Self {
            hash: HASH_SEED,
            parts: Vec::new(),
        }
    }

    /// Absorb one component. Arrays absorb element-wise; a null absorbs as
    /// a reserved marker.
    pub fn absorb(&mut self, component: Value) {
        if let Value::Array(items) = component {
            for item in items {
                self.absorb(item);
            }
            return;
        }
        let part_hash = match &component {
            Value::Null => NULL_MARKER,
            other => value_hash(other),
        };
        self.hash = self
            .hash
            .wrapping_mul(HASH_MULTIPLIER)
            .wrapping_add(part_hash);
        self.parts.push(component);
    }

    /// Absorb a string component.
    pub fn absorb_str(&mut self, component: impl Into<String>) {
        self.absorb(Value::String(component.into()));
    }

    /// Absorb an integer component.
    pub fn absorb_u64(&mut self, component: u64) {
        self.absorb(Value::from(component));
    }

    /// Number of absorbed components.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl Default for CacheKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.parts == other.parts
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)?;
        for part in &self.parts {
            write!(f, ":{part}")?;
        }
        Ok(())
    }
}

/// Order-insensitive hashing is fine per component; order sensitivity
/// comes from the multiply-accumulate in `absorb`.
fn value_hash(value: &Value) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    hash_value_into(value, &mut hasher);
    hasher.finish()
}

fn hash_value_into(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            b.hash(hasher);
        }
        Value::Number(n) => {
            hasher.write_u8(2);
            // 1 and 1.0 hash alike, matching the evaluator's loose equality
            if let Some(f) = n.as_f64() {
                hasher.write_u64(f.to_bits());
            }
        }
        Value::String(s) => {
            hasher.write_u8(3);
            s.hash(hasher);
        }
        Value::Array(items) => {
            hasher.write_u8(4);
            hasher.write_usize(items.len());
            for item in items {
                hash_value_into(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.write_u8(5);
            hasher.write_usize(map.len());
            for (k, v) in map {
                k.hash(hasher);
                hash_value_into(v, hasher);
            }
        }
    }
}
