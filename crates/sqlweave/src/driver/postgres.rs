//! tokio-postgres implementations of the driver contracts.
//!
//! [`connect_session`] pairs a [`PgTransaction`] and a
//! [`PgStatementHandler`] over one client: the transaction drives
//! BEGIN/COMMIT/ROLLBACK, the handler prepares and executes statements
//! inside it. Prepared statements are reused per session, keyed by their
//! rendered SQL.
//!
//! The executor composes SQL with positional `?` markers; this adapter
//! renders them as `$1, $2, ...` before preparing.

use super::{QueryRows, RowStream, StatementHandler, Transaction};
use crate::error::{WeaveError, WeaveResult};
use crate::executor::{BatchCommand, BatchResult, MappedStatement, StatementType};
use crate::scripting::BoundSql;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row, Statement};

/// Open a session over a connected client: `BEGIN` a transaction and hand
/// back the transaction/handler pair for `Configuration::build_executor`.
pub async fn connect_session(
    client: Client,
    timeout: Option<Duration>,
) -> WeaveResult<(PgTransaction, PgStatementHandler)> {
    let client = Arc::new(client);
    client
        .batch_execute("BEGIN")
        .await
        .map_err(|e| WeaveError::transaction(e.to_string()))?;
    let transaction = PgTransaction {
        client: client.clone(),
        timeout,
        open: true,
    };
    let handler = PgStatementHandler {
        client,
        statements: Mutex::new(HashMap::new()),
    };
    Ok((transaction, handler))
}

/// A transaction over one `tokio_postgres::Client`.
///
/// Commit and rollback leave a fresh transaction open, so the session
/// keeps running statements transactionally until `close`.
pub struct PgTransaction {
    client: Arc<Client>,
    timeout: Option<Duration>,
    open: bool,
}

impl PgTransaction {
    async fn run(&self, sql: &str) -> WeaveResult<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| WeaveError::transaction(format!("{sql} failed: {e}")))
    }
}

#[async_trait::async_trait]
impl Transaction for PgTransaction {
    async fn commit(&mut self) -> WeaveResult<()> {
        self.run("COMMIT").await?;
        self.run("BEGIN").await
    }

    async fn rollback(&mut self) -> WeaveResult<()> {
        self.run("ROLLBACK").await?;
        self.run("BEGIN").await
    }

    async fn close(&mut self) -> WeaveResult<()> {
        if self.open {
            self.open = false;
            self.run("ROLLBACK").await?;
        }
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Prepares, parameterizes and executes statements for one session.
pub struct PgStatementHandler {
    client: Arc<Client>,
    /// Prepared-statement reuse, keyed by rendered SQL.
    statements: Mutex<HashMap<String, Statement>>,
}

impl PgStatementHandler {
    async fn prepare(
        &self,
        stmt: &MappedStatement,
        sql: &str,
        timeout: Option<Duration>,
    ) -> WeaveResult<Statement> {
        let reuse = stmt.statement_type() != StatementType::Statement;
        if reuse {
            if let Some(prepared) = self.statements.lock().unwrap().get(sql) {
                return Ok(prepared.clone());
            }
        }
        let prepared = run_db(stmt.id(), sql, timeout, self.client.prepare(sql)).await?;
        if reuse {
            self.statements
                .lock()
                .unwrap()
                .insert(sql.to_string(), prepared.clone());
        }
        Ok(prepared)
    }

    fn bind(
        &self,
        stmt: &MappedStatement,
        sql: &str,
        prepared: &Statement,
        values: &[Value],
    ) -> WeaveResult<Vec<Box<dyn ToSql + Sync + Send>>> {
        let types = prepared.params();
        if types.len() != values.len() {
            return Err(WeaveError::statement(
                stmt.id(),
                sql,
                format!(
                    "statement wants {} parameters, {} were resolved",
                    types.len(),
                    values.len()
                ),
            ));
        }
        types
            .iter()
            .zip(values)
            .map(|(ty, value)| {
                bind_value(ty, value).map_err(|m| WeaveError::statement(stmt.id(), sql, m))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl StatementHandler for PgStatementHandler {
    async fn query(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<QueryRows> {
        let sql = numbered_placeholders(bound.sql());
        let prepared = self.prepare(stmt, &sql, timeout).await?;
        let boxed = self.bind(stmt, &sql, &prepared, values)?;
        let refs = param_refs(&boxed);
        let rows = run_db(
            stmt.id(),
            &sql,
            timeout,
            self.client.query(&prepared, &refs),
        )
        .await?;
        let rows = rows
            .iter()
            .map(|row| row_to_value(row).map_err(|m| WeaveError::statement(stmt.id(), &sql, m)))
            .collect::<WeaveResult<Vec<Value>>>()?;
        // Postgres surfaces procedure results as result sets, not OUT
        // parameters; callable replay is driven by handlers that have them.
        Ok(QueryRows {
            rows,
            out_params: None,
        })
    }

    async fn update(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<u64> {
        let sql = numbered_placeholders(bound.sql());
        let prepared = self.prepare(stmt, &sql, timeout).await?;
        let boxed = self.bind(stmt, &sql, &prepared, values)?;
        let refs = param_refs(&boxed);
        run_db(
            stmt.id(),
            &sql,
            timeout,
            self.client.execute(&prepared, &refs),
        )
        .await
    }

    async fn query_stream(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<RowStream> {
        let sql = numbered_placeholders(bound.sql());
        let prepared = self.prepare(stmt, &sql, timeout).await?;
        let boxed = self.bind(stmt, &sql, &prepared, values)?;
        let refs = param_refs(&boxed);
        let stream = run_db(
            stmt.id(),
            &sql,
            timeout,
            self.client.query_raw(&prepared, refs),
        )
        .await?;
        let statement_id = stmt.id().to_string();
        Ok(Box::pin(stream.map(move |item| match item {
            Ok(row) => row_to_value(&row)
                .map_err(|m| WeaveError::statement(&statement_id, "<cursor>", m)),
            Err(e) => Err(WeaveError::statement(
                &statement_id,
                "<cursor>",
                e.to_string(),
            )),
        })))
    }

    async fn run_batch(&mut self, commands: &[BatchCommand]) -> WeaveResult<Vec<BatchResult>> {
        let mut results: Vec<BatchResult> = Vec::new();
        for command in commands {
            let sql = numbered_placeholders(command.bound.sql());
            let prepared = run_db(
                &command.statement_id,
                &sql,
                None,
                self.client.prepare(&sql),
            )
            .await?;
            let types = prepared.params();
            if types.len() != command.values.len() {
                return Err(WeaveError::statement(
                    &command.statement_id,
                    &sql,
                    format!(
                        "statement wants {} parameters, {} were resolved",
                        types.len(),
                        command.values.len()
                    ),
                ));
            }
            let boxed = types
                .iter()
                .zip(&command.values)
                .map(|(ty, value)| {
                    bind_value(ty, value)
                        .map_err(|m| WeaveError::statement(&command.statement_id, &sql, m))
                })
                .collect::<WeaveResult<Vec<_>>>()?;
            let refs = param_refs(&boxed);
            let count = run_db(
                &command.statement_id,
                &sql,
                None,
                self.client.execute(&prepared, &refs),
            )
            .await?;
            match results
                .last_mut()
                .filter(|r| r.statement_id == command.statement_id)
            {
                Some(result) => result.update_counts.push(count),
                None => results.push(BatchResult {
                    statement_id: command.statement_id.clone(),
                    sql,
                    update_counts: vec![count],
                }),
            }
        }
        Ok(results)
    }
}

/// Run one driver future under the remaining timeout budget.
async fn run_db<T, F>(
    statement_id: &str,
    sql: &str,
    timeout: Option<Duration>,
    future: F,
) -> WeaveResult<T>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    let result = match timeout {
        Some(t) => tokio::time::timeout(t, future)
            .await
            .map_err(|_| WeaveError::Timeout(t))?,
        None => future.await,
    };
    result.map_err(|e| WeaveError::statement(statement_id, sql, e.to_string()))
}

fn param_refs(boxed: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    // drops Send from the trait object, as tokio-postgres wants
    boxed.iter().map(|b| &**b as &(dyn ToSql + Sync)).collect()
}

/// Render positional `?` markers as `$1, $2, ...`, leaving string
/// literals and quoted identifiers alone.
fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0u32;
    let mut in_string = false;
    let mut in_ident = false;
    for c in sql.chars() {
        match c {
            '\'' if !in_ident => {
                in_string = !in_string;
                out.push(c);
            }
            '"' if !in_string => {
                in_ident = !in_ident;
                out.push(c);
            }
            '?' if !in_string && !in_ident => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn as_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("{n} does not fit an integer column")),
        Value::Bool(b) => Ok(*b as i64),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| format!("'{s}' is not an integer: {e}")),
        other => Err(format!("{other} is not an integer")),
    }
}

fn as_f64(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{n} is not a float")),
        Value::String(s) => s.parse::<f64>().map_err(|e| format!("'{s}' is not a float: {e}")),
        other => Err(format!("{other} is not a float")),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Box a composed value as the concrete Rust type the parameter's
/// declared Postgres type wants.
fn bind_value(ty: &Type, value: &Value) -> Result<Box<dyn ToSql + Sync + Send>, String> {
    if value.is_null() {
        return null_value(ty);
    }
    if *ty == Type::BOOL {
        match value {
            Value::Bool(b) => Ok(Box::new(*b)),
            other => Err(format!("{other} is not a boolean")),
        }
    } else if *ty == Type::INT2 {
        Ok(Box::new(as_i64(value)? as i16))
    } else if *ty == Type::INT4 {
        Ok(Box::new(as_i64(value)? as i32))
    } else if *ty == Type::INT8 {
        Ok(Box::new(as_i64(value)?))
    } else if *ty == Type::FLOAT4 {
        Ok(Box::new(as_f64(value)? as f32))
    } else if *ty == Type::FLOAT8 {
        Ok(Box::new(as_f64(value)?))
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        Ok(Box::new(as_text(value)))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Ok(Box::new(value.clone()))
    } else if *ty == Type::UUID {
        match value {
            Value::String(s) => uuid::Uuid::parse_str(s)
                .map(|u| Box::new(u) as Box<dyn ToSql + Sync + Send>)
                .map_err(|e| format!("'{s}' is not a uuid: {e}")),
            other => Err(format!("{other} is not a uuid")),
        }
    } else if *ty == Type::TIMESTAMPTZ {
        match value {
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|t| {
                    Box::new(t.with_timezone(&chrono::Utc)) as Box<dyn ToSql + Sync + Send>
                })
                .map_err(|e| format!("'{s}' is not an RFC 3339 timestamp: {e}")),
            other => Err(format!("{other} is not a timestamp")),
        }
    } else if *ty == Type::TIMESTAMP {
        match value {
            Value::String(s) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|t| Box::new(t) as Box<dyn ToSql + Sync + Send>)
                .map_err(|e| format!("'{s}' is not a timestamp: {e}")),
            other => Err(format!("{other} is not a timestamp")),
        }
    } else if *ty == Type::DATE {
        match value {
            Value::String(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| Box::new(d) as Box<dyn ToSql + Sync + Send>)
                .map_err(|e| format!("'{s}' is not a date: {e}")),
            other => Err(format!("{other} is not a date")),
        }
    } else {
        Err(format!("unsupported parameter type {}", ty.name()))
    }
}

fn null_value(ty: &Type) -> Result<Box<dyn ToSql + Sync + Send>, String> {
    if *ty == Type::BOOL {
        Ok(Box::new(None::<bool>))
    } else if *ty == Type::INT2 {
        Ok(Box::new(None::<i16>))
    } else if *ty == Type::INT4 {
        Ok(Box::new(None::<i32>))
    } else if *ty == Type::INT8 {
        Ok(Box::new(None::<i64>))
    } else if *ty == Type::FLOAT4 {
        Ok(Box::new(None::<f32>))
    } else if *ty == Type::FLOAT8 {
        Ok(Box::new(None::<f64>))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Ok(Box::new(None::<Value>))
    } else if *ty == Type::UUID {
        Ok(Box::new(None::<uuid::Uuid>))
    } else if *ty == Type::TIMESTAMPTZ {
        Ok(Box::new(None::<chrono::DateTime<chrono::Utc>>))
    } else if *ty == Type::TIMESTAMP {
        Ok(Box::new(None::<chrono::NaiveDateTime>))
    } else if *ty == Type::DATE {
        Ok(Box::new(None::<chrono::NaiveDate>))
    } else {
        Ok(Box::new(None::<String>))
    }
}

/// Decode one row into an object keyed by column name.
fn row_to_value(row: &Row) -> Result<Value, String> {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_())
            .map_err(|m| format!("column '{}': {m}", column.name()))?;
        map.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(map))
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Result<Value, String> {
    fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, String>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    if *ty == Type::BOOL {
        Ok(get::<bool>(row, idx)?.map_or(Value::Null, Value::Bool))
    } else if *ty == Type::INT2 {
        Ok(get::<i16>(row, idx)?.map_or(Value::Null, |v| Value::from(v as i64)))
    } else if *ty == Type::INT4 {
        Ok(get::<i32>(row, idx)?.map_or(Value::Null, |v| Value::from(v as i64)))
    } else if *ty == Type::INT8 {
        Ok(get::<i64>(row, idx)?.map_or(Value::Null, Value::from))
    } else if *ty == Type::FLOAT4 {
        Ok(get::<f32>(row, idx)?.map_or(Value::Null, |v| Value::from(v as f64)))
    } else if *ty == Type::FLOAT8 {
        Ok(get::<f64>(row, idx)?.map_or(Value::Null, Value::from))
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        Ok(get::<String>(row, idx)?.map_or(Value::Null, Value::String))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Ok(get::<Value>(row, idx)?.unwrap_or(Value::Null))
    } else if *ty == Type::UUID {
        Ok(get::<uuid::Uuid>(row, idx)?.map_or(Value::Null, |u| Value::String(u.to_string())))
    } else if *ty == Type::TIMESTAMPTZ {
        Ok(get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map_or(Value::Null, |t| Value::String(t.to_rfc3339())))
    } else if *ty == Type::TIMESTAMP {
        Ok(get::<chrono::NaiveDateTime>(row, idx)?
            .map_or(Value::Null, |t| Value::String(t.to_string())))
    } else if *ty == Type::DATE {
        Ok(get::<chrono::NaiveDate>(row, idx)?
            .map_or(Value::Null, |d| Value::String(d.to_string())))
    } else {
        Err(format!("unsupported column type {}", ty.name()))
    }
}
