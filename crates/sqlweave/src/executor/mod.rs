//! The session executor.
//!
//! An executor is the unit of session state: it owns a transaction, a
//! statement handler, the local result cache, and the deferred-load queue.
//! It is single-owner; all operations (including nested queries reached
//! through deferred loads and plugins) run on one logical task.

mod deferred;
mod statement;


pub use deferred::{DeferredLoad, TargetKind};
pub use statement::{BatchCommand, BatchResult, MappedStatement, RowBounds, StatementType};

use crate::cache::{CacheKey, LocalCache};
use crate::config::{Configuration, ExecutorKind, LocalCacheScope};
use crate::driver::{RowCallback, RowStream, StatementHandler, Transaction};
use crate::error::{WeaveError, WeaveResult};
use crate::object::ObjectRef;
use crate::scripting::{BoundSql, ParamSpec};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Row count reported by `update` in batch mode, where the real counts
/// arrive with `flush_statements`.
pub const BATCH_PENDING_ROWS: u64 = u64::MAX;

/// Session-scoped execution of reads, writes and batches against a
/// transactional connection.
#[async_trait::async_trait]
pub trait Executor: Send {
    /// Execute a write. Clears the local cache first; returns affected
    /// rows (or [`BATCH_PENDING_ROWS`] in batch mode).
    async fn update(&mut self, stmt: &Arc<MappedStatement>, param: ObjectRef) -> WeaveResult<u64>;

    /// The canonical read path: compose, probe the cache, execute on miss.
    /// Installing a row callback bypasses the cache probe.
    async fn query(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
    ) -> WeaveResult<Arc<Vec<Value>>>;

    /// Streaming read; bypasses the cache entirely.
    async fn query_cursor(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
    ) -> WeaveResult<RowStream>;

    /// Drain queued batch commands. With `rollback` set the queue is
    /// discarded instead.
    async fn flush_statements(&mut self, rollback: bool) -> WeaveResult<Vec<BatchResult>>;

    /// Clear session state, flush, and (if `required`) commit the
    /// transaction.
    async fn commit(&mut self, required: bool) -> WeaveResult<()>;

    /// Clear session state, discard the batch queue, and (if `required`)
    /// roll the transaction back.
    async fn rollback(&mut self, required: bool) -> WeaveResult<()>;

    /// Release the session. Best effort: rollback and close failures are
    /// logged and swallowed; afterwards every operation fails closed.
    /// Idempotent.
    async fn close(&mut self, force_rollback: bool);

    fn is_closed(&self) -> bool;

    /// Stage an assignment of the nested-query result under `key` into
    /// `owner.property`. Runs immediately when the result is already
    /// materialized, otherwise once the top-level query completes.
    fn defer_load(
        &mut self,
        stmt: &Arc<MappedStatement>,
        owner: ObjectRef,
        property: &str,
        key: CacheKey,
        target: TargetKind,
    ) -> WeaveResult<()>;

    /// Drop every cached result (and cached output parameters).
    fn clear_local_cache(&mut self);

    /// Build the value-equality key identifying one invocation.
    fn create_cache_key(
        &self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        bounds: RowBounds,
    ) -> WeaveResult<CacheKey>;
}

/// The concrete session executor.
pub struct SessionExecutor {
    config: Arc<Configuration>,
    transaction: Box<dyn Transaction>,
    handler: Box<dyn StatementHandler>,
    kind: ExecutorKind,
    local_cache: LocalCache,
    out_param_cache: HashMap<CacheKey, Map<String, Value>>,
    deferred: VecDeque<DeferredLoad>,
    batch: Vec<BatchCommand>,
    query_depth: usize,
    closed: bool,
}

impl SessionExecutor {
    pub fn new(
        config: Arc<Configuration>,
        transaction: Box<dyn Transaction>,
        handler: Box<dyn StatementHandler>,
    ) -> Self {
        let kind = config.executor_kind();
        Self {
            config,
            transaction,
            handler,
            kind,
            local_cache: LocalCache::new(),
            out_param_cache: HashMap::new(),
            deferred: VecDeque::new(),
            batch: Vec::new(),
            query_depth: 0,
            closed: false,
        }
    }

    fn check_open(&self) -> WeaveResult<()> {
        if self.closed {
            Err(WeaveError::Closed)
        } else {
            Ok(())
        }
    }

    /// Statement timeout narrowed by the transaction's remaining budget.
    fn effective_timeout(&self, stmt: &MappedStatement) -> Option<Duration> {
        let declared = stmt.timeout().or_else(|| self.config.default_timeout());
        match (declared, self.transaction.timeout()) {
            (Some(s), Some(t)) => Some(s.min(t)),
            (s, t) => s.or(t),
        }
    }

    /// One resolved value per descriptor, in order; OUT slots bind null.
    fn resolve_parameter_values(&self, bound: &BoundSql) -> WeaveResult<Vec<Value>> {
        bound
            .params()
            .iter()
            .map(|spec| self.resolve_one(bound, spec))
            .collect()
    }

    fn resolve_one(&self, bound: &BoundSql, spec: &ParamSpec) -> WeaveResult<Value> {
        if !spec.is_input() {
            return Ok(Value::Null);
        }
        let value = bound.resolve_value(&spec.property)?;
        match &spec.value_type {
            Some(type_name) => self.config.converters().convert(type_name, &value),
            None => Ok(value),
        }
    }

    async fn query_at_depth(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: &ObjectRef,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
        key: &CacheKey,
        bound: &BoundSql,
    ) -> WeaveResult<Arc<Vec<Value>>> {
        if callback.is_none() {
            if let Some(rows) = self.local_cache.ready(key) {
                trace!(statement = stmt.id(), "local cache hit");
                if stmt.statement_type() == StatementType::Callable {
                    self.replay_output_parameters(param, key, bound)?;
                }
                return Ok(rows);
            }
        }
        self.query_from_database(stmt, param, bounds, callback, key, bound)
            .await
    }

    async fn query_from_database(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: &ObjectRef,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
        key: &CacheKey,
        bound: &BoundSql,
    ) -> WeaveResult<Arc<Vec<Value>>> {
        debug!(statement = stmt.id(), sql = bound.sql(), "querying database");
        self.local_cache.put_building(key.clone());
        let outcome = self.run_query(stmt, bounds, callback, bound).await;
        // the sentinel comes out on success and on failure alike, so a
        // later probe sees "absent" rather than "in progress"
        self.local_cache.remove(key);
        let (rows, out_params) = outcome?;
        self.local_cache.put(key.clone(), rows.clone());
        if stmt.statement_type() == StatementType::Callable {
            let out = out_params.unwrap_or_default();
            self.apply_output_parameters(param, bound, &out)?;
            self.out_param_cache.insert(key.clone(), out);
        }
        Ok(rows)
    }

    async fn run_query(
        &mut self,
        stmt: &Arc<MappedStatement>,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
        bound: &BoundSql,
    ) -> WeaveResult<(Arc<Vec<Value>>, Option<Map<String, Value>>)> {
        let values = self.resolve_parameter_values(bound)?;
        let timeout = self.effective_timeout(stmt);
        let result = self
            .handler
            .query(stmt, bound, &values, timeout)
            .await
            .map_err(|e| attach_statement(e, stmt, bound.sql()))?;
        let mut rows = result.rows;
        if !bounds.is_default() {
            rows = rows
                .into_iter()
                .skip(bounds.offset)
                .take(bounds.limit)
                .collect();
        }
        let rows = match callback {
            Some(cb) => {
                for row in &rows {
                    cb.handle_row(row);
                }
                Arc::new(Vec::new())
            }
            None => Arc::new(rows),
        };
        Ok((rows, result.out_params))
    }

    fn apply_output_parameters(
        &self,
        param: &ObjectRef,
        bound: &BoundSql,
        out: &Map<String, Value>,
    ) -> WeaveResult<()> {
        for spec in bound.params().iter().filter(|s| s.is_output()) {
            if let Some(value) = out.get(&spec.property) {
                param.set_with(&spec.property, value.clone(), self.config.object_factory())?;
            }
        }
        Ok(())
    }

    fn replay_output_parameters(
        &self,
        param: &ObjectRef,
        key: &CacheKey,
        bound: &BoundSql,
    ) -> WeaveResult<()> {
        match self.out_param_cache.get(key) {
            Some(cached) => {
                let cached = cached.clone();
                self.apply_output_parameters(param, bound, &cached)
            }
            None => Ok(()),
        }
    }

    fn drain_deferred_loads(&mut self) -> WeaveResult<()> {
        while let Some(load) = self.deferred.pop_front() {
            load.load(&self.local_cache, self.config.object_factory())?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Executor for SessionExecutor {
    async fn update(&mut self, stmt: &Arc<MappedStatement>, param: ObjectRef) -> WeaveResult<u64> {
        self.check_open()?;
        debug!(statement = stmt.id(), "executing update");
        self.clear_local_cache();
        let bound = stmt.source().bound_sql(param.snapshot())?;
        let values = self.resolve_parameter_values(&bound)?;
        match self.kind {
            ExecutorKind::Simple => {
                let timeout = self.effective_timeout(stmt);
                self.handler
                    .update(stmt, &bound, &values, timeout)
                    .await
                    .map_err(|e| attach_statement(e, stmt, bound.sql()))
            }
            ExecutorKind::Batch => {
                self.batch.push(BatchCommand {
                    statement_id: stmt.id().to_string(),
                    bound,
                    values,
                });
                Ok(BATCH_PENDING_ROWS)
            }
        }
    }

    async fn query(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
    ) -> WeaveResult<Arc<Vec<Value>>> {
        self.check_open()?;
        let bound = stmt.source().bound_sql(param.snapshot())?;
        let key = self.create_cache_key(stmt, &bound, bounds)?;
        if self.query_depth == 0 && stmt.flush_cache() {
            debug!(statement = stmt.id(), "statement requests cache flush");
            self.clear_local_cache();
        }
        self.query_depth += 1;
        let result = self
            .query_at_depth(stmt, &param, bounds, callback, &key, &bound)
            .await;
        self.query_depth -= 1;
        if self.query_depth == 0 && result.is_ok() {
            self.drain_deferred_loads()?;
            if self.config.local_cache_scope() == LocalCacheScope::Statement {
                self.clear_local_cache();
            }
        }
        result
    }

    async fn query_cursor(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
    ) -> WeaveResult<RowStream> {
        self.check_open()?;
        let bound = stmt.source().bound_sql(param.snapshot())?;
        let values = self.resolve_parameter_values(&bound)?;
        let timeout = self.effective_timeout(stmt);
        debug!(statement = stmt.id(), sql = bound.sql(), "opening cursor");
        let stream = self
            .handler
            .query_stream(stmt, &bound, &values, timeout)
            .await
            .map_err(|e| attach_statement(e, stmt, bound.sql()))?;
        if bounds.is_default() {
            Ok(stream)
        } else {
            use futures_util::StreamExt;
            Ok(Box::pin(stream.skip(bounds.offset).take(bounds.limit)))
        }
    }

    async fn flush_statements(&mut self, rollback: bool) -> WeaveResult<Vec<BatchResult>> {
        self.check_open()?;
        let commands: Vec<BatchCommand> = self.batch.drain(..).collect();
        if rollback || commands.is_empty() {
            return Ok(Vec::new());
        }
        debug!(pending = commands.len(), "flushing batch statements");
        self.handler.run_batch(&commands).await
    }

    async fn commit(&mut self, required: bool) -> WeaveResult<()> {
        self.check_open()?;
        self.clear_local_cache();
        self.flush_statements(false).await?;
        if required {
            debug!("committing transaction");
            self.transaction.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self, required: bool) -> WeaveResult<()> {
        self.check_open()?;
        self.clear_local_cache();
        let flushed = self.flush_statements(true).await.map(|_| ());
        // the transaction still rolls back even when the flush failed
        if required {
            debug!("rolling back transaction");
            self.transaction.rollback().await?;
        }
        flushed
    }

    async fn close(&mut self, force_rollback: bool) {
        if self.closed {
            return;
        }
        if let Err(e) = self.rollback(force_rollback).await {
            warn!(error = %e, "ignoring rollback failure during close");
        }
        if let Err(e) = self.transaction.close().await {
            warn!(error = %e, "ignoring transaction close failure");
        }
        self.local_cache.clear();
        self.out_param_cache.clear();
        self.deferred.clear();
        self.batch.clear();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn defer_load(
        &mut self,
        stmt: &Arc<MappedStatement>,
        owner: ObjectRef,
        property: &str,
        key: CacheKey,
        target: TargetKind,
    ) -> WeaveResult<()> {
        self.check_open()?;
        trace!(statement = stmt.id(), property, "deferring nested load");
        let load = DeferredLoad::new(owner, property, key, target);
        if load.can_load(&self.local_cache) {
            load.load(&self.local_cache, self.config.object_factory())
        } else {
            self.deferred.push_back(load);
            Ok(())
        }
    }

    fn clear_local_cache(&mut self) {
        if !self.closed {
            self.local_cache.clear();
            self.out_param_cache.clear();
        }
    }

    fn create_cache_key(
        &self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        bounds: RowBounds,
    ) -> WeaveResult<CacheKey> {
        self.check_open()?;
        let mut key = CacheKey::new();
        key.absorb_str(stmt.id());
        key.absorb_u64(bounds.offset as u64);
        key.absorb_u64(bounds.limit as u64);
        key.absorb_str(bound.sql());
        for spec in bound.params().iter().filter(|s| s.is_input()) {
            key.absorb(bound.resolve_value(&spec.property)?);
        }
        if let Some(environment_id) = self.config.environment_id() {
            key.absorb_str(environment_id);
        }
        Ok(key)
    }
}

/// Driver failures carry the originating statement id and SQL; errors
/// that already identify themselves pass through.
fn attach_statement(err: WeaveError, stmt: &MappedStatement, sql: &str) -> WeaveError {
    match err {
        e @ (WeaveError::Statement { .. } | WeaveError::Timeout(_) | WeaveError::Closed) => e,
        other => WeaveError::statement(stmt.id(), sql, other.to_string()),
    }
}
