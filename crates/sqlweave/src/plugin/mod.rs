//! Interception: a chainable pipeline wrapped around an executor.
//!
//! Plugins see an operation's arguments before the executor does and its
//! reply after; they can rewrite either, or short-circuit the call
//! entirely. The wrapped executor never knows it is wrapped.
//!
//! `Invocation::proceed` consumes the invocation, so a plugin can proceed
//! at most once; short-circuiting is simply returning without calling it.

mod paging;


pub use paging::{Dialect, PageInterceptor, PostgresDialect};

use crate::cache::CacheKey;
use crate::driver::{RowCallback, RowStream};
use crate::error::{WeaveError, WeaveResult};
use crate::executor::{BatchResult, Executor, MappedStatement, RowBounds, TargetKind};
use crate::object::ObjectRef;
use crate::scripting::BoundSql;
use futures_core::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// The executor operations a plugin can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPoint {
    Query,
    Update,
    FlushStatements,
}

/// Arguments of an intercepted call. Plugins may mutate these before
/// proceeding; the downstream executor sees the mutated values.
pub enum CallArgs {
    Query {
        stmt: Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
    },
    Update {
        stmt: Arc<MappedStatement>,
        param: ObjectRef,
    },
    FlushStatements {
        rollback: bool,
    },
}

impl CallArgs {
    pub fn point(&self) -> InterceptPoint {
        match self {
            CallArgs::Query { .. } => InterceptPoint::Query,
            CallArgs::Update { .. } => InterceptPoint::Update,
            CallArgs::FlushStatements { .. } => InterceptPoint::FlushStatements,
        }
    }
}

/// Reply of an intercepted call, matching its point.
#[derive(Debug, Clone)]
pub enum CallReply {
    Rows(Arc<Vec<Value>>),
    Affected(u64),
    Batches(Vec<BatchResult>),
}

type ProceedFn<'a> = Box<dyn FnOnce(CallArgs) -> BoxFuture<'a, WeaveResult<CallReply>> + Send + 'a>;

/// One in-flight intercepted call.
pub struct Invocation<'a> {
    /// The call arguments, open for rewriting.
    pub args: CallArgs,
    proceed: ProceedFn<'a>,
}

impl<'a> Invocation<'a> {
    pub fn point(&self) -> InterceptPoint {
        self.args.point()
    }

    /// Continue down the pipeline with the (possibly rewritten) arguments.
    /// Consumes the invocation: proceeding twice is unrepresentable.
    pub async fn proceed(self) -> WeaveResult<CallReply> {
        (self.proceed)(self.args).await
    }
}

/// A cross-cutting plugin wrapped around executor operations.
///
/// Implementations should surface their own failures as
/// [`WeaveError::interceptor`] carrying [`Interceptor::name`].
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync {
    /// Plugin name, attached to interceptor errors.
    fn name(&self) -> &str;

    /// The set of operations this plugin claims. Everything else passes
    /// through untouched.
    fn intercepts(&self, point: InterceptPoint) -> bool;

    /// Handle one claimed call: rewrite `invocation.args`, proceed, and/or
    /// rewrite the reply.
    async fn intercept(&self, invocation: Invocation<'_>) -> WeaveResult<CallReply>;
}

/// The ordered set of registered plugins.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Wrap an executor in every registered plugin, innermost-last: the
    /// chain wraps in reverse declaration order, so the first-registered
    /// plugin sees each call first.
    pub fn wrap_all(&self, executor: Box<dyn Executor>) -> Box<dyn Executor> {
        let mut wrapped = executor;
        for interceptor in self.interceptors.iter().rev() {
            wrapped = Box::new(InterceptedExecutor {
                interceptor: interceptor.clone(),
                inner: wrapped,
            });
        }
        wrapped
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

/// One layer of the pipeline: a plugin around an executor.
struct InterceptedExecutor {
    interceptor: Arc<dyn Interceptor>,
    inner: Box<dyn Executor>,
}

#[async_trait::async_trait]
impl Executor for InterceptedExecutor {
    async fn update(&mut self, stmt: &Arc<MappedStatement>, param: ObjectRef) -> WeaveResult<u64> {
        if !self.interceptor.intercepts(InterceptPoint::Update) {
            return self.inner.update(stmt, param).await;
        }
        let name = self.interceptor.name().to_string();
        let proceed_name = name.clone();
        let inner = &mut self.inner;
        let invocation = Invocation {
            args: CallArgs::Update {
                stmt: stmt.clone(),
                param,
            },
            proceed: Box::new(move |args| {
                Box::pin(async move {
                    match args {
                        CallArgs::Update { stmt, param } => {
                            inner.update(&stmt, param).await.map(CallReply::Affected)
                        }
                        _ => Err(retargeted(&proceed_name)),
                    }
                })
            }),
        };
        match self.interceptor.intercept(invocation).await? {
            CallReply::Affected(n) => Ok(n),
            _ => Err(mismatched(&name, "update")),
        }
    }

    async fn query(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
        callback: Option<Arc<dyn RowCallback>>,
    ) -> WeaveResult<Arc<Vec<Value>>> {
        if !self.interceptor.intercepts(InterceptPoint::Query) {
            return self.inner.query(stmt, param, bounds, callback).await;
        }
        let name = self.interceptor.name().to_string();
        let proceed_name = name.clone();
        let inner = &mut self.inner;
        let invocation = Invocation {
            args: CallArgs::Query {
                stmt: stmt.clone(),
                param,
                bounds,
                callback,
            },
            proceed: Box::new(move |args| {
                Box::pin(async move {
                    match args {
                        CallArgs::Query {
                            stmt,
                            param,
                            bounds,
                            callback,
                        } => inner
                            .query(&stmt, param, bounds, callback)
                            .await
                            .map(CallReply::Rows),
                        _ => Err(retargeted(&proceed_name)),
                    }
                })
            }),
        };
        match self.interceptor.intercept(invocation).await? {
            CallReply::Rows(rows) => Ok(rows),
            _ => Err(mismatched(&name, "query")),
        }
    }

    async fn query_cursor(
        &mut self,
        stmt: &Arc<MappedStatement>,
        param: ObjectRef,
        bounds: RowBounds,
    ) -> WeaveResult<RowStream> {
        self.inner.query_cursor(stmt, param, bounds).await
    }

    async fn flush_statements(&mut self, rollback: bool) -> WeaveResult<Vec<BatchResult>> {
        if !self.interceptor.intercepts(InterceptPoint::FlushStatements) {
            return self.inner.flush_statements(rollback).await;
        }
        let name = self.interceptor.name().to_string();
        let proceed_name = name.clone();
        let inner = &mut self.inner;
        let invocation = Invocation {
            args: CallArgs::FlushStatements { rollback },
            proceed: Box::new(move |args| {
                Box::pin(async move {
                    match args {
                        CallArgs::FlushStatements { rollback } => inner
                            .flush_statements(rollback)
                            .await
                            .map(CallReply::Batches),
                        _ => Err(retargeted(&proceed_name)),
                    }
                })
            }),
        };
        match self.interceptor.intercept(invocation).await? {
            CallReply::Batches(results) => Ok(results),
            _ => Err(mismatched(&name, "flush_statements")),
        }
    }

    async fn commit(&mut self, required: bool) -> WeaveResult<()> {
        self.inner.commit(required).await
    }

    async fn rollback(&mut self, required: bool) -> WeaveResult<()> {
        self.inner.rollback(required).await
    }

    async fn close(&mut self, force_rollback: bool) {
        self.inner.close(force_rollback).await;
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn defer_load(
        &mut self,
        stmt: &Arc<MappedStatement>,
        owner: ObjectRef,
        property: &str,
        key: CacheKey,
        target: TargetKind,
    ) -> WeaveResult<()> {
        self.inner.defer_load(stmt, owner, property, key, target)
    }

    fn clear_local_cache(&mut self) {
        self.inner.clear_local_cache();
    }

    fn create_cache_key(
        &self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        bounds: RowBounds,
    ) -> WeaveResult<CacheKey> {
        self.inner.create_cache_key(stmt, bound, bounds)
    }
}

fn retargeted(name: &str) -> WeaveError {
    WeaveError::interceptor(name, "invocation arguments retargeted to a different operation")
}

fn mismatched(name: &str, operation: &str) -> WeaveError {
    WeaveError::interceptor(name, format!("reply does not match intercepted {operation}"))
}
