use crate::error::WeaveResult;
use serde_json::{Map, Value};

/// Reserved binding holding the root parameter object.
pub const PARAMETER_BINDING: &str = "_parameter";

/// Per-composition accumulator: the in-progress SQL fragments plus the
/// binding map visible to every node in the tree.
///
/// Not thread-safe by design; exactly one node tree composes on a context,
/// and the context is discarded afterwards.
#[derive(Debug)]
pub struct DynamicContext {
    bindings: Map<String, Value>,
    fragments: Vec<String>,
    unique: u32,
}

impl DynamicContext {
    /// Start a composition for the given root parameter object.
    pub fn new(parameter: Value) -> Self {
        let mut bindings = Map::new();
        bindings.insert(PARAMETER_BINDING.to_string(), parameter);
        Self {
            bindings,
            fragments: Vec::new(),
            unique: 0,
        }
    }

    /// Append a SQL fragment. Fragments are trimmed; empty ones vanish.
    pub fn append_sql(&mut self, part: &str) {
        let part = part.trim();
        if !part.is_empty() {
            self.fragments.push(part.to_string());
        }
    }

    /// Publish a binding, visible to every node applied after this point.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// The current binding map.
    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    /// The root parameter object.
    pub fn parameter(&self) -> &Value {
        self.bindings
            .get(PARAMETER_BINDING)
            .unwrap_or(&Value::Null)
    }

    /// Bindings published during composition, without the reserved slots.
    pub fn additional_parameters(&self) -> Map<String, Value> {
        self.bindings
            .iter()
            .filter(|(name, _)| name.as_str() != PARAMETER_BINDING)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Next value of the monotone unique-number counter.
    pub fn unique_number(&mut self) -> u32 {
        let n = self.unique;
        self.unique += 1;
        n
    }

    /// The composed SQL so far: fragments joined by single spaces.
    pub fn sql(&self) -> String {
        self.fragments.join(" ")
    }

    /// Run `f` with an empty fragment buffer and hand back what it emitted,
    /// leaving bindings and the unique counter shared. Used by wrappers
    /// (trim, foreach) that post-process their child's output.
    pub(crate) fn capture<F>(&mut self, f: F) -> WeaveResult<(bool, String)>
    where
        F: FnOnce(&mut DynamicContext) -> WeaveResult<bool>,
    {
        let saved = std::mem::take(&mut self.fragments);
        let result = f(self);
        let captured = std::mem::replace(&mut self.fragments, saved);
        let contributed = result?;
        Ok((contributed, captured.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fragments_join_with_single_spaces() {
        let mut ctx = DynamicContext::new(Value::Null);
        ctx.append_sql("SELECT *");
        ctx.append_sql("  FROM t  ");
        ctx.append_sql("");
        ctx.append_sql("WHERE id = ?");
        assert_eq!(ctx.sql(), "SELECT * FROM t WHERE id = ?");
    }

    #[test]
    fn unique_numbers_are_monotone() {
        let mut ctx = DynamicContext::new(Value::Null);
        assert_eq!(ctx.unique_number(), 0);
        assert_eq!(ctx.unique_number(), 1);
        assert_eq!(ctx.unique_number(), 2);
    }

    #[test]
    fn additional_parameters_exclude_the_root_slot() {
        let mut ctx = DynamicContext::new(json!({"id": 1}));
        ctx.bind("extra", json!("x"));
        let additional = ctx.additional_parameters();
        assert_eq!(additional.len(), 1);
        assert_eq!(additional.get("extra"), Some(&json!("x")));
    }

    #[test]
    fn capture_restores_outer_fragments() {
        let mut ctx = DynamicContext::new(Value::Null);
        ctx.append_sql("outer");
        let (contributed, inner) = ctx
            .capture(|c| {
                c.append_sql("inner a");
                c.append_sql("inner b");
                Ok(true)
            })
            .unwrap();
        assert!(contributed);
        assert_eq!(inner, "inner a inner b");
        assert_eq!(ctx.sql(), "outer");
    }
}
