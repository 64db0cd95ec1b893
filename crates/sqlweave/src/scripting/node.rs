use super::context::DynamicContext;
use super::tokens::{Fragment, guard_splice, has_splice, split_tokens};
use crate::error::{WeaveError, WeaveResult};
use crate::expr;
use serde_json::Value;

/// Prefix keywords a `where` wrapper strips from its body. The trailing
/// whitespace keeps identifiers like `ANDROID` intact.
const WHERE_PREFIX_OVERRIDES: &str = "AND |OR |AND\n|OR\n|AND\r|OR\r|AND\t|OR\t";

/// One composable piece of dynamic SQL.
///
/// Trees are built once at statement-registration time and are immutable
/// thereafter; `apply` walks the tree against a [`DynamicContext`].
#[derive(Debug, Clone)]
pub enum SqlNode {
    /// Literal SQL. `dynamic` marks text carrying `${...}` splices, which
    /// must be substituted per composition.
    Text { content: String, dynamic: bool },
    /// An ordered sequence of children.
    Mixed(Vec<SqlNode>),
    /// Applies the body iff `test` is truthy.
    If { test: String, body: Box<SqlNode> },
    /// First truthy guard wins; `otherwise` is the default branch.
    Choose {
        whens: Vec<(String, SqlNode)>,
        otherwise: Option<Box<SqlNode>>,
    },
    /// Strips configured overrides off the body's boundaries and wraps the
    /// remainder in `prefix`/`suffix`. A whitespace-only body produces no
    /// output at all.
    Trim {
        body: Box<SqlNode>,
        prefix: Option<String>,
        suffix: Option<String>,
        prefix_overrides: Vec<String>,
        suffix_overrides: Vec<String>,
    },
    /// Iterates a sequence or keyed mapping from the bindings.
    ForEach {
        collection: String,
        item: Option<String>,
        index: Option<String>,
        open: Option<String>,
        close: Option<String>,
        separator: Option<String>,
        body: Box<SqlNode>,
    },
    /// Evaluates `value` and publishes it under `name`.
    Bind { name: String, value: String },
}

impl SqlNode {
    /// Literal SQL text.
    pub fn text(content: impl Into<String>) -> SqlNode {
        let content = content.into();
        let dynamic = has_splice(&content);
        SqlNode::Text { content, dynamic }
    }

    /// An ordered sequence of nodes.
    pub fn mixed(children: impl IntoIterator<Item = SqlNode>) -> SqlNode {
        SqlNode::Mixed(children.into_iter().collect())
    }

    /// A conditional branch.
    pub fn if_(test: impl Into<String>, body: SqlNode) -> SqlNode {
        SqlNode::If {
            test: test.into(),
            body: Box::new(body),
        }
    }

    /// A guarded-choice branch. The first truthy guard applies; the
    /// default applies when none is.
    pub fn choose(
        whens: impl IntoIterator<Item = (String, SqlNode)>,
        otherwise: Option<SqlNode>,
    ) -> SqlNode {
        SqlNode::Choose {
            whens: whens.into_iter().collect(),
            otherwise: otherwise.map(Box::new),
        }
    }

    /// A trim wrapper. Override lists are `|`-separated and matched
    /// case-insensitively.
    pub fn trim(
        body: SqlNode,
        prefix: Option<&str>,
        prefix_overrides: Option<&str>,
        suffix: Option<&str>,
        suffix_overrides: Option<&str>,
    ) -> SqlNode {
        SqlNode::Trim {
            body: Box::new(body),
            prefix: prefix.map(str::to_string),
            suffix: suffix.map(str::to_string),
            prefix_overrides: parse_overrides(prefix_overrides),
            suffix_overrides: parse_overrides(suffix_overrides),
        }
    }

    /// `WHERE` wrapper: prepends `WHERE`, strips a leading `AND`/`OR`.
    pub fn where_(body: SqlNode) -> SqlNode {
        Self::trim(body, Some("WHERE"), Some(WHERE_PREFIX_OVERRIDES), None, None)
    }

    /// `SET` wrapper: prepends `SET`, strips a trailing comma.
    pub fn set_(body: SqlNode) -> SqlNode {
        Self::trim(body, Some("SET"), None, None, Some(","))
    }

    /// An iteration over a collection binding.
    #[allow(clippy::too_many_arguments)]
    pub fn foreach(
        collection: impl Into<String>,
        item: Option<&str>,
        index: Option<&str>,
        open: Option<&str>,
        close: Option<&str>,
        separator: Option<&str>,
        body: SqlNode,
    ) -> SqlNode {
        SqlNode::ForEach {
            collection: collection.into(),
            item: item.map(str::to_string),
            index: index.map(str::to_string),
            open: open.map(str::to_string),
            close: close.map(str::to_string),
            separator: separator.map(str::to_string),
            body: Box::new(body),
        }
    }

    /// A binding declaration.
    pub fn bind(name: impl Into<String>, value: impl Into<String>) -> SqlNode {
        SqlNode::Bind {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether composing this tree depends on runtime bindings.
    pub fn is_dynamic(&self) -> bool {
        match self {
            SqlNode::Text { dynamic, .. } => *dynamic,
            SqlNode::Mixed(children) => children.iter().any(SqlNode::is_dynamic),
            _ => true,
        }
    }

    /// Contribute this node's SQL to the context. The returned bool means
    /// "this branch contributed" and propagates to conditional wrappers.
    pub fn apply(&self, ctx: &mut DynamicContext) -> WeaveResult<bool> {
        match self {
            SqlNode::Text { content, dynamic } => {
                if *dynamic {
                    ctx_append_spliced(ctx, content)?;
                } else {
                    ctx.append_sql(content);
                }
                Ok(true)
            }
            SqlNode::Mixed(children) => {
                let mut contributed = false;
                for child in children {
                    contributed |= child.apply(ctx)?;
                }
                Ok(contributed)
            }
            SqlNode::If { test, body } => {
                if expr::evaluate_truthy(test, ctx.bindings())? {
                    body.apply(ctx)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            SqlNode::Choose { whens, otherwise } => {
                for (test, node) in whens {
                    if expr::evaluate_truthy(test, ctx.bindings())? {
                        node.apply(ctx)?;
                        return Ok(true);
                    }
                }
                if let Some(node) = otherwise {
                    node.apply(ctx)?;
                    return Ok(true);
                }
                Ok(false)
            }
            SqlNode::Trim {
                body,
                prefix,
                suffix,
                prefix_overrides,
                suffix_overrides,
            } => apply_trim(
                ctx,
                body,
                prefix.as_deref(),
                suffix.as_deref(),
                prefix_overrides,
                suffix_overrides,
            ),
            SqlNode::ForEach {
                collection,
                item,
                index,
                open,
                close,
                separator,
                body,
            } => apply_foreach(
                ctx,
                collection,
                item.as_deref(),
                index.as_deref(),
                open.as_deref(),
                close.as_deref(),
                separator.as_deref(),
                body,
            ),
            SqlNode::Bind { name, value } => {
                let bound = expr::evaluate(value, ctx.bindings())?;
                ctx.bind(name.clone(), bound);
                Ok(true)
            }
        }
    }
}

/// Split a `|`-separated override list, stored upper-cased for matching.
fn parse_overrides(overrides: Option<&str>) -> Vec<String> {
    match overrides {
        None => Vec::new(),
        Some(list) => list
            .split('|')
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .collect(),
    }
}

/// Substitute `${...}` splices from the bindings and append. Null and
/// missing values splice as the empty string; a splice is never re-scanned
/// for further tokens.
fn ctx_append_spliced(ctx: &mut DynamicContext, content: &str) -> WeaveResult<()> {
    let mut out = String::with_capacity(content.len());
    for fragment in split_tokens(content, "${", "}") {
        match fragment {
            Fragment::Text(text) => out.push_str(&text),
            Fragment::Token(expr_src) => {
                let value = expr::evaluate(expr_src.trim(), ctx.bindings())?;
                // single pass: what a splice carries is never re-scanned
                out.push_str(&guard_splice(&splice_text(&value)));
            }
        }
    }
    ctx.append_sql(&out);
    Ok(())
}

fn splice_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn apply_trim(
    ctx: &mut DynamicContext,
    body: &SqlNode,
    prefix: Option<&str>,
    suffix: Option<&str>,
    prefix_overrides: &[String],
    suffix_overrides: &[String],
) -> WeaveResult<bool> {
    let (contributed, body_text) = ctx.capture(|c| body.apply(c))?;
    let mut text = body_text.trim().to_string();
    if text.is_empty() {
        // empty body: the wrapper is a no-op, prefix and suffix included
        return Ok(contributed);
    }
    let upper = text.to_uppercase();
    for over in prefix_overrides {
        if upper.starts_with(over) {
            text.drain(..over.len());
            break;
        }
    }
    let text = text.trim_start();
    let upper = text.to_uppercase();
    let mut end = text.len();
    for over in suffix_overrides {
        if upper.ends_with(over) {
            end -= over.len();
            break;
        }
    }
    let text = text[..end].trim_end();
    if text.is_empty() {
        return Ok(contributed);
    }
    let mut out = String::new();
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        out.push(' ');
    }
    out.push_str(text);
    if let Some(suffix) = suffix {
        out.push(' ');
        out.push_str(suffix);
    }
    ctx.append_sql(&out);
    Ok(contributed)
}

#[allow(clippy::too_many_arguments)]
fn apply_foreach(
    ctx: &mut DynamicContext,
    collection: &str,
    item: Option<&str>,
    index: Option<&str>,
    open: Option<&str>,
    close: Option<&str>,
    separator: Option<&str>,
    body: &SqlNode,
) -> WeaveResult<bool> {
    let resolved = expr::evaluate(collection, ctx.bindings())?;
    let entries: Vec<(Value, Value)> = match resolved {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i as u64), v))
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (Value::String(k), v))
            .collect(),
        Value::Null => {
            return Err(WeaveError::build(format!(
                "foreach collection '{collection}' evaluated to null"
            )));
        }
        other => {
            return Err(WeaveError::build(format!(
                "foreach collection '{collection}' is not iterable: {other}"
            )));
        }
    };
    if entries.is_empty() {
        return Ok(true);
    }
    if let Some(open) = open {
        ctx.append_sql(open);
    }
    let mut first = true;
    for (index_value, item_value) in entries {
        let unique = ctx.unique_number();
        if let Some(item) = item {
            ctx.bind(item.to_string(), item_value.clone());
            ctx.bind(iteration_name(item, unique), item_value);
        }
        if let Some(index) = index {
            ctx.bind(index.to_string(), index_value.clone());
            ctx.bind(iteration_name(index, unique), index_value);
        }
        let (_, body_text) = ctx.capture(|c| body.apply(c))?;
        let rewritten = uniquify_placeholders(&body_text, item, index, unique);
        if rewritten.trim().is_empty() {
            continue;
        }
        if !first {
            if let Some(separator) = separator {
                ctx.append_sql(separator);
            }
        }
        ctx.append_sql(&rewritten);
        first = false;
    }
    if let Some(close) = close {
        ctx.append_sql(close);
    }
    Ok(true)
}

/// The uniquified binding name for one iteration of a foreach variable.
fn iteration_name(name: &str, unique: u32) -> String {
    format!("__frch_{name}_{unique}")
}

/// Rewrite `#{item...}` / `#{index...}` references inside one iteration's
/// output to their uniquified names, so repeated iterations yield distinct
/// parameter descriptors.
fn uniquify_placeholders(
    text: &str,
    item: Option<&str>,
    index: Option<&str>,
    unique: u32,
) -> String {
    let mut out = String::with_capacity(text.len());
    for fragment in split_tokens(text, "#{", "}") {
        match fragment {
            Fragment::Text(t) => out.push_str(&t),
            Fragment::Token(content) => {
                out.push_str("#{");
                out.push_str(&rewrite_token(&content, item, index, unique));
                out.push('}');
            }
        }
    }
    out
}

fn rewrite_token(content: &str, item: Option<&str>, index: Option<&str>, unique: u32) -> String {
    let (property, attrs) = match content.find(',') {
        Some(pos) => (&content[..pos], &content[pos..]),
        None => (content, ""),
    };
    let trimmed = property.trim();
    for var in [item, index].into_iter().flatten() {
        let tail = match trimmed.strip_prefix(var) {
            Some(tail) => tail,
            None => continue,
        };
        // only whole-variable references: `item`, `item.x`, `item[0]`
        if tail.is_empty() || tail.starts_with('.') || tail.starts_with('[') {
            return format!("{}{tail}{attrs}", iteration_name(var, unique));
        }
    }
    content.to_string()
}
