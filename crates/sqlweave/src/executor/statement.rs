use crate::scripting::{BoundSql, SqlSource};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// How the driver should run a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// Plain, unprepared execution.
    Statement,
    /// Prepared with bound placeholders.
    #[default]
    Prepared,
    /// A procedure call that may hand values back through OUT parameters.
    Callable,
}

/// An immutable, registered statement: an id, its SQL source, and
/// execution options. Built once at registration time.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    id: String,
    source: SqlSource,
    statement_type: StatementType,
    flush_cache: bool,
    timeout: Option<Duration>,
}

impl MappedStatement {
    pub fn new(id: impl Into<String>, source: SqlSource) -> Self {
        Self {
            id: id.into(),
            source,
            statement_type: StatementType::default(),
            flush_cache: false,
            timeout: None,
        }
    }

    /// Set the statement type.
    pub fn with_statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement_type = statement_type;
        self
    }

    /// Clear the session's local cache before any top-level execution of
    /// this statement.
    pub fn with_flush_cache(mut self, flush: bool) -> Self {
        self.flush_cache = flush;
        self
    }

    /// Per-statement execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Swap the SQL source, keeping everything else. Used by plugins that
    /// re-target a statement at rewritten SQL.
    pub fn with_source(mut self, source: SqlSource) -> Self {
        self.source = source;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &SqlSource {
        &self.source
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    pub fn flush_cache(&self) -> bool {
        self.flush_cache
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A logical result window. The executor trims returned rows to this
/// window in memory unless a plugin has already pushed it into the SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    pub const NO_OFFSET: usize = 0;
    pub const NO_LIMIT: usize = usize::MAX;

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Whether this is the unbounded window.
    pub fn is_default(&self) -> bool {
        self.offset == Self::NO_OFFSET && self.limit == Self::NO_LIMIT
    }
}

impl Default for RowBounds {
    fn default() -> Self {
        Self {
            offset: Self::NO_OFFSET,
            limit: Self::NO_LIMIT,
        }
    }
}

/// One pending write queued by a batch-mode executor.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub statement_id: String,
    pub bound: BoundSql,
    pub values: Vec<Value>,
}

/// The outcome of draining one statement's queued batch commands.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub statement_id: String,
    pub sql: String,
    pub update_counts: Vec<u64>,
}
