//! Dynamic SQL composition.
//!
//! A statement's SQL is a tree of [`SqlNode`]s built once at registration
//! time. Composing the tree against a parameter object walks it with a
//! [`DynamicContext`], then rewrites `#{...}` placeholders into positional
//! `?` markers, yielding an immutable [`BoundSql`]: final SQL text plus its
//! ordered parameter descriptors.
//!
//! # Example
//!
//! ```ignore
//! use sqlweave::{SqlNode, SqlSource};
//! use serde_json::json;
//!
//! let tree = SqlNode::mixed([
//!     SqlNode::text("SELECT * FROM users"),
//!     SqlNode::where_(SqlNode::if_("name != null", SqlNode::text("name = #{name}"))),
//! ]);
//! let source = SqlSource::dynamic(tree);
//! let bound = source.bound_sql(json!({"name": "ada"}))?;
//! assert_eq!(bound.sql(), "SELECT * FROM users WHERE name = ?");
//! ```

mod bound;
mod context;
mod node;
mod tokens;

#[cfg(test)]
mod tests;

pub use bound::{BoundSql, ParamMode, ParamSpec};
pub use context::{DynamicContext, PARAMETER_BINDING};
pub use node::SqlNode;

use crate::error::{WeaveError, WeaveResult};
use bound::parse_placeholders;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokens::unguard;

/// Where a statement's SQL comes from.
#[derive(Debug, Clone)]
pub enum SqlSource {
    /// Static text, placeholder-parsed once at build time.
    Raw {
        sql: String,
        params: Vec<ParamSpec>,
    },
    /// A node tree composed per execution.
    Dynamic(Arc<SqlNode>),
    /// An already-composed bound SQL; produced by plugins that rewrite a
    /// statement in flight.
    PreBound(BoundSql),
}

impl SqlSource {
    /// Build a source from literal text. Text carrying `${...}` splices
    /// needs per-execution composition and becomes dynamic; anything else
    /// is parsed once here.
    pub fn from_text(text: impl Into<String>) -> WeaveResult<SqlSource> {
        let text = text.into();
        let node = SqlNode::text(text.clone());
        if node.is_dynamic() {
            return Ok(SqlSource::Dynamic(Arc::new(node)));
        }
        let (sql, params) = parse_placeholders(&text)?;
        if sql.trim().is_empty() {
            return Err(WeaveError::build("statement SQL is empty"));
        }
        Ok(SqlSource::Raw { sql, params })
    }

    /// Build a source from a node tree.
    pub fn dynamic(root: SqlNode) -> SqlSource {
        SqlSource::Dynamic(Arc::new(root))
    }

    /// Compose the final SQL and parameter descriptors for one execution.
    pub fn bound_sql(&self, parameter: Value) -> WeaveResult<BoundSql> {
        match self {
            SqlSource::Raw { sql, params } => Ok(BoundSql::new(
                sql.clone(),
                params.clone(),
                parameter,
                Map::new(),
            )),
            SqlSource::Dynamic(root) => {
                let mut ctx = DynamicContext::new(parameter);
                root.apply(&mut ctx)?;
                let composed = ctx.sql();
                if composed.trim().is_empty() {
                    return Err(WeaveError::build(
                        "dynamic SQL composed to an empty statement",
                    ));
                }
                let (sql, params) = parse_placeholders(&composed)?;
                let additional = ctx.additional_parameters();
                Ok(BoundSql::new(
                    unguard(&sql),
                    params,
                    ctx.parameter().clone(),
                    additional,
                ))
            }
            SqlSource::PreBound(bound) => Ok(bound.clone()),
        }
    }
}
