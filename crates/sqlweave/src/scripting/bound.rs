use super::context::PARAMETER_BINDING;
use super::tokens::{Fragment, split_tokens};
use crate::error::{WeaveError, WeaveResult};
use crate::expr;
use serde_json::{Map, Value};

/// Parameter flow direction for a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamMode {
    #[default]
    In,
    Out,
    InOut,
}

/// One parameter descriptor, produced for each `#{...}` placeholder in
/// composition order.
///
/// The attribute list inside the placeholder drives the optional fields:
/// `#{name, mode=OUT, type=int, dbType=int8, nullable=false, scale=2}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Property path resolved against additional parameters, then the root
    /// parameter object.
    pub property: String,
    pub mode: ParamMode,
    /// Declared converter type; resolved through the type-converter
    /// registry when present.
    pub value_type: Option<String>,
    /// Driver-level type hint, passed through to the statement handler.
    pub db_type: Option<String>,
    pub nullable: bool,
    pub numeric_scale: Option<u32>,
}

impl ParamSpec {
    /// A plain input parameter with no attributes.
    pub fn input(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            mode: ParamMode::In,
            value_type: None,
            db_type: None,
            nullable: true,
            numeric_scale: None,
        }
    }

    /// Parse the content of a `#{...}` token.
    pub fn parse(content: &str) -> WeaveResult<Self> {
        let mut parts = content.split(',');
        let property = parts
            .next()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| WeaveError::build("empty parameter placeholder"))?;
        let mut spec = Self::input(property);
        for attr in parts {
            let attr = attr.trim();
            if attr.is_empty() {
                continue;
            }
            let (key, value) = attr.split_once('=').ok_or_else(|| {
                WeaveError::build(format!(
                    "malformed attribute '{attr}' in parameter '{content}'"
                ))
            })?;
            let value = value.trim();
            match key.trim() {
                "mode" => {
                    spec.mode = match value.to_ascii_uppercase().as_str() {
                        "IN" => ParamMode::In,
                        "OUT" => ParamMode::Out,
                        "INOUT" => ParamMode::InOut,
                        other => {
                            return Err(WeaveError::build(format!(
                                "unknown parameter mode '{other}' in '{content}'"
                            )));
                        }
                    };
                }
                "type" => spec.value_type = Some(value.to_string()),
                "dbType" => spec.db_type = Some(value.to_string()),
                "nullable" => {
                    spec.nullable = value.parse::<bool>().map_err(|_| {
                        WeaveError::build(format!(
                            "nullable must be true or false in parameter '{content}'"
                        ))
                    })?;
                }
                "scale" => {
                    spec.numeric_scale = Some(value.parse::<u32>().map_err(|_| {
                        WeaveError::build(format!(
                            "scale must be an integer in parameter '{content}'"
                        ))
                    })?);
                }
                other => {
                    return Err(WeaveError::build(format!(
                        "unknown attribute '{other}' in parameter '{content}'"
                    )));
                }
            }
        }
        Ok(spec)
    }

    /// Whether the driver is expected to supply a value back for this
    /// parameter.
    pub fn is_output(&self) -> bool {
        matches!(self.mode, ParamMode::Out | ParamMode::InOut)
    }

    /// Whether a value is bound for this parameter on the way in.
    pub fn is_input(&self) -> bool {
        matches!(self.mode, ParamMode::In | ParamMode::InOut)
    }
}

/// Rewrite composed SQL: each `#{...}` token becomes a positional `?` and
/// contributes one descriptor, in order.
pub(crate) fn parse_placeholders(sql: &str) -> WeaveResult<(String, Vec<ParamSpec>)> {
    let mut out = String::with_capacity(sql.len());
    let mut params = Vec::new();
    for fragment in split_tokens(sql, "#{", "}") {
        match fragment {
            Fragment::Text(text) => out.push_str(&text),
            Fragment::Token(content) => {
                params.push(ParamSpec::parse(&content)?);
                out.push('?');
            }
        }
    }
    Ok((out, params))
}

/// The final product of a composition: executable SQL with positional `?`
/// placeholders, its ordered parameter descriptors, a snapshot of the root
/// parameter, and the additional parameters published while composing.
///
/// Immutable; valid for one execution.
#[derive(Debug, Clone)]
pub struct BoundSql {
    sql: String,
    params: Vec<ParamSpec>,
    parameter: Value,
    additional: Map<String, Value>,
}

impl BoundSql {
    pub(crate) fn new(
        sql: String,
        params: Vec<ParamSpec>,
        parameter: Value,
        additional: Map<String, Value>,
    ) -> Self {
        Self {
            sql,
            params,
            parameter,
            additional,
        }
    }

    /// The executable SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Ordered parameter descriptors, one per `?`.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// The root parameter snapshot the SQL was composed against.
    pub fn parameter(&self) -> &Value {
        &self.parameter
    }

    /// Bindings published by `bind` and `foreach` during composition.
    pub fn additional_parameters(&self) -> &Map<String, Value> {
        &self.additional
    }

    /// A copy of this bound SQL with different SQL text, keeping the
    /// descriptors and bindings. Used by plugins that rewrite statements.
    pub fn with_sql(&self, sql: impl Into<String>) -> BoundSql {
        BoundSql {
            sql: sql.into(),
            params: self.params.clone(),
            parameter: self.parameter.clone(),
            additional: self.additional.clone(),
        }
    }

    /// Resolve one descriptor's value: additional parameters are preferred
    /// over the root parameter object; a scalar root answers bare property
    /// names directly.
    pub fn resolve_value(&self, property: &str) -> WeaveResult<Value> {
        let mut bindings = self.additional.clone();
        bindings.insert(PARAMETER_BINDING.to_string(), self.parameter.clone());
        let value = expr::evaluate(property, &bindings)?;
        if value.is_null()
            && !self.parameter.is_object()
            && !self.parameter.is_array()
            && !self.parameter.is_null()
            && !property.contains(['.', '['])
            && !self.additional.contains_key(property)
        {
            // a scalar root parameter answers any bare name
            return Ok(self.parameter.clone());
        }
        Ok(value)
    }

    /// Number of positional placeholders in the SQL text.
    pub fn placeholder_count(&self) -> usize {
        self.sql.bytes().filter(|b| *b == b'?').count()
    }
}
