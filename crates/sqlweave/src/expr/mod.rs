//! Test-expression evaluation for dynamic SQL.
//!
//! Branch guards (`if`/`when` tests), `bind` values, `foreach` collections
//! and parameter property paths are all small expressions evaluated against
//! the composition's binding map: member access, indexing, comparison, and
//! boolean logic over JSON values.
//!
//! Parsed expressions are memoized process-wide keyed by source text. The
//! expression set is fixed at statement-registration time, so the cache is
//! unbounded; repeated parses of the same text are harmless.

mod eval;
mod lexer;
mod parser;

pub use parser::{BinaryOp, Expr, PathSeg};

use crate::error::WeaveResult;
use parser::Parser;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

static EXPR_CACHE: OnceLock<Mutex<HashMap<String, Arc<Expr>>>> = OnceLock::new();

/// Parse an expression, consulting the process-wide cache first.
pub fn parse(source: &str) -> WeaveResult<Arc<Expr>> {
    let cache = EXPR_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(expr) = cache.lock().unwrap().get(source) {
        return Ok(expr.clone());
    }
    // Parse outside the lock; a racing duplicate insert is harmless.
    let expr = Arc::new(Parser::parse(source)?);
    cache
        .lock()
        .unwrap()
        .entry(source.to_string())
        .or_insert_with(|| expr.clone());
    Ok(expr)
}

/// Evaluate an expression against a binding map.
///
/// Unknown names resolve to `Null`; a name missing from the bindings falls
/// back through the reserved root-parameter slot.
pub fn evaluate(source: &str, bindings: &Map<String, Value>) -> WeaveResult<Value> {
    let expr = parse(source)?;
    eval::eval(&expr, bindings)
}

/// Evaluate an expression and reduce it to truthiness.
pub fn evaluate_truthy(source: &str, bindings: &Map<String, Value>) -> WeaveResult<bool> {
    Ok(truthy(&evaluate(source, bindings)?))
}

/// Truthiness rules: booleans as-is, numbers non-zero, strings non-empty,
/// arrays/objects non-empty, null false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
