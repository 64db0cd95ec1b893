//! Collaborator contracts at the driver seam, plus the PostgreSQL
//! implementation.
//!
//! The executor never talks to a database directly: it composes SQL,
//! resolves parameter values, and hands both to a [`StatementHandler`]
//! running inside a [`Transaction`]'s lifetime. Everything here is a
//! contract; `postgres` carries the tokio-postgres implementation.

pub mod postgres;

use crate::error::{WeaveError, WeaveResult};
use crate::executor::{BatchCommand, BatchResult, MappedStatement};
use crate::scripting::BoundSql;
use futures_core::Stream;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A stream of result rows for cursor queries.
pub type RowStream = Pin<Box<dyn Stream<Item = WeaveResult<Value>> + Send>>;

/// The transactional connection an executor owns.
///
/// The executor drives commit/rollback/close; plugins must not. `timeout`
/// is the transaction-level budget, propagated (diminished by statement
/// options) to each driver call.
#[async_trait::async_trait]
pub trait Transaction: Send {
    async fn commit(&mut self) -> WeaveResult<()>;
    async fn rollback(&mut self) -> WeaveResult<()>;
    async fn close(&mut self) -> WeaveResult<()>;
    fn timeout(&self) -> Option<Duration>;
}

/// Rows returned from the driver, plus any OUT-parameter values a
/// callable statement produced, keyed by descriptor property.
#[derive(Debug, Clone, Default)]
pub struct QueryRows {
    pub rows: Vec<Value>,
    pub out_params: Option<Map<String, Value>>,
}

/// Prepares, parameterizes and executes statements against a connection.
///
/// `values` is aligned with `bound.params()`: one resolved value per
/// descriptor, in order (`Null` for OUT-mode slots).
#[async_trait::async_trait]
pub trait StatementHandler: Send {
    async fn query(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<QueryRows>;

    async fn update(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<u64>;

    async fn query_stream(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<RowStream>;

    /// Drain queued batch commands, grouping consecutive commands for the
    /// same statement into one [`BatchResult`].
    async fn run_batch(&mut self, commands: &[BatchCommand]) -> WeaveResult<Vec<BatchResult>>;
}

/// Per-row callback for handler-driven reads. Installing one bypasses the
/// local-cache probe.
pub trait RowCallback: Send + Sync {
    fn handle_row(&self, row: &Value);
}

/// Maps a composed value before it is bound, when its descriptor declares
/// a type.
pub trait TypeConverter: Send + Sync {
    fn convert(&self, value: &Value) -> WeaveResult<Value>;
}

/// Registry answering "does a converter exist for this declared type" and
/// applying it.
#[derive(Clone)]
pub struct TypeConverterRegistry {
    converters: HashMap<String, Arc<dyn TypeConverter>>,
}

impl TypeConverterRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// Register a converter under a type name.
    pub fn register(&mut self, type_name: impl Into<String>, converter: Arc<dyn TypeConverter>) {
        self.converters.insert(type_name.into(), converter);
    }

    /// Whether a converter exists for the given type.
    pub fn has(&self, type_name: &str) -> bool {
        self.converters.contains_key(type_name)
    }

    /// Convert a value through the named converter.
    pub fn convert(&self, type_name: &str, value: &Value) -> WeaveResult<Value> {
        match self.converters.get(type_name) {
            Some(converter) => converter.convert(value),
            None => Err(WeaveError::build(format!(
                "no type converter registered for '{type_name}'"
            ))),
        }
    }
}

impl Default for TypeConverterRegistry {
    /// A registry with converters for the built-in scalar type names:
    /// `string`, `int`, `float`, `bool`.
    fn default() -> Self {
        struct FnConverter(fn(&Value) -> WeaveResult<Value>);
        impl TypeConverter for FnConverter {
            fn convert(&self, value: &Value) -> WeaveResult<Value> {
                (self.0)(value)
            }
        }

        let mut registry = Self::empty();
        registry.register(
            "string",
            Arc::new(FnConverter(|v| {
                Ok(match v {
                    Value::Null => Value::Null,
                    Value::String(s) => Value::String(s.clone()),
                    other => Value::String(other.to_string()),
                })
            })),
        );
        registry.register(
            "int",
            Arc::new(FnConverter(|v| match v {
                Value::Null => Ok(Value::Null),
                Value::Number(n) if n.as_i64().is_some() => Ok(v.clone()),
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0) as i64)),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|e| WeaveError::build(format!("cannot convert '{s}' to int: {e}"))),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                other => Err(WeaveError::build(format!("cannot convert {other} to int"))),
            })),
        );
        registry.register(
            "float",
            Arc::new(FnConverter(|v| match v {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|e| WeaveError::build(format!("cannot convert '{s}' to float: {e}"))),
                other => Err(WeaveError::build(format!("cannot convert {other} to float"))),
            })),
        );
        registry.register(
            "bool",
            Arc::new(FnConverter(|v| match v {
                Value::Null => Ok(Value::Null),
                Value::Bool(_) => Ok(v.clone()),
                Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                Value::String(s) => Ok(Value::Bool(!s.is_empty())),
                other => Err(WeaveError::build(format!("cannot convert {other} to bool"))),
            })),
        );
        registry
    }
}

impl std::fmt::Debug for TypeConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeConverterRegistry")
            .field("types", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}
