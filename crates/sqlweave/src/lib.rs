//! # sqlweave
//!
//! The core of a persistence framework: dynamic SQL composition plus a
//! session-scoped statement executor for PostgreSQL.
//!
//! ## Features
//!
//! - **Dynamic SQL**: immutable fragment trees (`if`/`choose`/`where`/
//!   `set`/`trim`/`foreach`/`bind`) composed per execution into final SQL
//!   with ordered parameter descriptors
//! - **Session executor**: read/write/batch execution over one
//!   transaction, with a first-level result cache and a deferred-load
//!   queue for nested object graphs
//! - **Interception**: a Russian-doll plugin pipeline that can rewrite
//!   arguments or results without the executor's knowledge
//! - **Driver seam**: transactions and statement handling behind traits,
//!   with a `tokio-postgres` implementation
//!
//! ## Example
//!
//! ```ignore
//! use sqlweave::{Configuration, MappedStatement, ObjectRef, RowBounds, SqlNode, SqlSource};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut config = Configuration::new().with_environment_id("main");
//! let stmt = config.add_statement(MappedStatement::new(
//!     "users.search",
//!     SqlSource::dynamic(SqlNode::mixed([
//!         SqlNode::text("SELECT * FROM users"),
//!         SqlNode::where_(SqlNode::if_("name != null", SqlNode::text("name = #{name}"))),
//!     ])),
//! ))?;
//!
//! let config = Arc::new(config);
//! let (tx, handler) = sqlweave::driver::postgres::connect_session(client, None).await?;
//! let mut executor = config.build_executor(Box::new(tx), Box::new(handler));
//! let rows = executor
//!     .query(&stmt, ObjectRef::new(json!({"name": "ada"})), RowBounds::default(), None)
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod expr;
pub mod object;
pub mod plugin;
pub mod scripting;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheEntry, CacheKey, LocalCache};
pub use config::{Configuration, ExecutorKind, LocalCacheScope};
pub use driver::{
    QueryRows, RowCallback, RowStream, StatementHandler, Transaction, TypeConverter,
    TypeConverterRegistry,
};
pub use error::{WeaveError, WeaveResult};
pub use executor::{
    BATCH_PENDING_ROWS, BatchCommand, BatchResult, Executor, MappedStatement, RowBounds,
    SessionExecutor, StatementType, TargetKind,
};
pub use object::{DefaultObjectFactory, ObjectFactory, ObjectRef};
pub use plugin::{
    CallArgs, CallReply, Dialect, InterceptPoint, Interceptor, InterceptorChain, Invocation,
    PageInterceptor, PostgresDialect,
};
pub use scripting::{BoundSql, DynamicContext, ParamMode, ParamSpec, SqlNode, SqlSource};
