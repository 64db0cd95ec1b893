//! Session and statement configuration.

use crate::driver::{StatementHandler, Transaction, TypeConverterRegistry};
use crate::error::{WeaveError, WeaveResult};
use crate::executor::{Executor, MappedStatement, SessionExecutor};
use crate::object::{DefaultObjectFactory, ObjectFactory};
use crate::plugin::{Interceptor, InterceptorChain};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// When the session's local cache is dropped automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalCacheScope {
    /// Results live until a write, flush, commit or rollback.
    #[default]
    Session,
    /// Results are additionally dropped when each top-level query ends.
    Statement,
}

/// How writes reach the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorKind {
    /// Every update executes immediately.
    #[default]
    Simple,
    /// Updates queue up and execute on `flush_statements`.
    Batch,
}

/// Immutable framework configuration: the statement registry, plugins,
/// type converters, and session policies. Built once, shared by every
/// executor through an `Arc`.
pub struct Configuration {
    environment_id: Option<String>,
    local_cache_scope: LocalCacheScope,
    executor_kind: ExecutorKind,
    default_timeout: Option<Duration>,
    statements: HashMap<String, Arc<MappedStatement>>,
    interceptors: InterceptorChain,
    converters: TypeConverterRegistry,
    object_factory: Arc<dyn ObjectFactory>,
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            environment_id: None,
            local_cache_scope: LocalCacheScope::default(),
            executor_kind: ExecutorKind::default(),
            default_timeout: None,
            statements: HashMap::new(),
            interceptors: InterceptorChain::new(),
            converters: TypeConverterRegistry::default(),
            object_factory: Arc::new(DefaultObjectFactory),
        }
    }

    /// Identifier of the database environment, absorbed into cache keys.
    pub fn with_environment_id(mut self, id: impl Into<String>) -> Self {
        self.environment_id = Some(id.into());
        self
    }

    pub fn with_local_cache_scope(mut self, scope: LocalCacheScope) -> Self {
        self.local_cache_scope = scope;
        self
    }

    pub fn with_executor_kind(mut self, kind: ExecutorKind) -> Self {
        self.executor_kind = kind;
        self
    }

    /// Default per-statement timeout, used when a statement declares none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Register a plugin. Declaration order matters: the first registered
    /// interceptor ends up outermost in the pipeline.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.add(interceptor);
        self
    }

    pub fn with_converters(mut self, converters: TypeConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    pub fn with_object_factory(mut self, factory: Arc<dyn ObjectFactory>) -> Self {
        self.object_factory = factory;
        self
    }

    /// Register a statement. Ids are unique.
    pub fn add_statement(&mut self, statement: MappedStatement) -> WeaveResult<Arc<MappedStatement>> {
        let id = statement.id().to_string();
        if self.statements.contains_key(&id) {
            return Err(WeaveError::build(format!(
                "statement '{id}' is already registered"
            )));
        }
        let statement = Arc::new(statement);
        self.statements.insert(id, statement.clone());
        Ok(statement)
    }

    /// Look up a registered statement.
    pub fn statement(&self, id: &str) -> Option<Arc<MappedStatement>> {
        self.statements.get(id).cloned()
    }

    pub fn environment_id(&self) -> Option<&str> {
        self.environment_id.as_deref()
    }

    pub fn local_cache_scope(&self) -> LocalCacheScope {
        self.local_cache_scope
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.executor_kind
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn converters(&self) -> &TypeConverterRegistry {
        &self.converters
    }

    pub fn object_factory(&self) -> &dyn ObjectFactory {
        self.object_factory.as_ref()
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    /// Open a session: a [`SessionExecutor`] over the given transaction
    /// and handler, wrapped by the registered interceptor chain.
    pub fn build_executor(
        self: &Arc<Self>,
        transaction: Box<dyn Transaction>,
        handler: Box<dyn StatementHandler>,
    ) -> Box<dyn Executor> {
        let executor = SessionExecutor::new(self.clone(), transaction, handler);
        self.interceptors.wrap_all(Box::new(executor))
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("environment_id", &self.environment_id)
            .field("local_cache_scope", &self.local_cache_scope)
            .field("executor_kind", &self.executor_kind)
            .field("statements", &self.statements.len())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
