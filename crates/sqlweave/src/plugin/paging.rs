//! Pagination pushed into the SQL.
//!
//! Without a plugin the executor satisfies [`RowBounds`] by windowing
//! returned rows in memory. [`PageInterceptor`] rewrites the statement to
//! use the database's own paging clause and zeroes the logical bounds, so
//! the driver returns only the requested window and the in-memory pass is
//! skipped.

use super::{CallArgs, CallReply, InterceptPoint, Interceptor, Invocation};
use crate::error::WeaveResult;
use crate::executor::RowBounds;
use crate::scripting::SqlSource;
use std::fmt::Write;
use std::sync::Arc;

/// A database dialect's paging syntax.
pub trait Dialect: Send + Sync {
    /// Rewrite `sql` to return `limit` rows starting at `offset`.
    fn page_sql(&self, sql: &str, offset: usize, limit: usize) -> String;
}

/// `LIMIT n OFFSET m` paging.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn page_sql(&self, sql: &str, offset: usize, limit: usize) -> String {
        let mut out = sql.to_string();
        if limit != RowBounds::NO_LIMIT {
            let _ = write!(out, " LIMIT {limit}");
        }
        if offset != RowBounds::NO_OFFSET {
            let _ = write!(out, " OFFSET {offset}");
        }
        out
    }
}

/// The canonical plugin: rewrites bounded queries to the dialect's paging
/// syntax.
pub struct PageInterceptor {
    dialect: Arc<dyn Dialect>,
}

impl PageInterceptor {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self { dialect }
    }

    /// A page interceptor speaking `LIMIT ... OFFSET ...`.
    pub fn postgres() -> Self {
        Self::new(Arc::new(PostgresDialect))
    }
}

#[async_trait::async_trait]
impl Interceptor for PageInterceptor {
    fn name(&self) -> &str {
        "PageInterceptor"
    }

    fn intercepts(&self, point: InterceptPoint) -> bool {
        point == InterceptPoint::Query
    }

    async fn intercept(&self, mut invocation: Invocation<'_>) -> WeaveResult<CallReply> {
        if let CallArgs::Query {
            stmt,
            param,
            bounds,
            ..
        } = &mut invocation.args
        {
            if !bounds.is_default() {
                let bound = stmt.source().bound_sql(param.snapshot())?;
                let paged = self
                    .dialect
                    .page_sql(bound.sql(), bounds.offset, bounds.limit);
                let rewritten = stmt
                    .as_ref()
                    .clone()
                    .with_source(SqlSource::PreBound(bound.with_sql(paged)));
                *stmt = Arc::new(rewritten);
                *bounds = RowBounds::default();
            }
        }
        invocation.proceed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_appends_limit_and_offset() {
        let d = PostgresDialect;
        assert_eq!(
            d.page_sql("SELECT * FROM t", 20, 10),
            "SELECT * FROM t LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            d.page_sql("SELECT * FROM t", 0, 10),
            "SELECT * FROM t LIMIT 10"
        );
        assert_eq!(
            d.page_sql("SELECT * FROM t", 5, RowBounds::NO_LIMIT),
            "SELECT * FROM t OFFSET 5"
        );
    }
}
