//! Error types for sqlweave

use thiserror::Error;

/// Result type alias for sqlweave operations
pub type WeaveResult<T> = Result<T, WeaveError>;

/// Error types for composition and execution
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Operation attempted on a closed executor
    #[error("Executor is closed")]
    Closed,

    /// Expression lexing, parsing, or evaluation failure
    #[error("Expression error: {0}")]
    Expression(String),

    /// Dynamic SQL produced an empty or malformed statement
    #[error("Build error: {0}")]
    Build(String),

    /// Driver-level SQL failure, with the originating statement attached
    #[error("Statement '{statement_id}' failed: {message} (sql: {sql})")]
    Statement {
        statement_id: String,
        sql: String,
        message: String,
    },

    /// Commit/rollback/close failure
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A user plugin threw
    #[error("Interceptor '{name}' failed: {message}")]
    Interceptor { name: String, message: String },

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl WeaveError {
    /// Create an expression error
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression(message.into())
    }

    /// Create a build error
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    /// Create a statement error for a specific statement id and SQL text
    pub fn statement(
        statement_id: impl Into<String>,
        sql: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Statement {
            statement_id: statement_id.into(),
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction(message.into())
    }

    /// Create an interceptor error carrying the plugin name
    pub fn interceptor(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interceptor {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Check if this is a closed-executor error
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if this is a build error
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Check if this is an expression error
    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }

    /// Check if this is a statement error
    pub fn is_statement(&self) -> bool {
        matches!(self, Self::Statement { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
