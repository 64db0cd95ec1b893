//! In-memory driver fakes shared by executor and plugin tests.

use crate::driver::{QueryRows, RowStream, StatementHandler, Transaction};
use crate::error::{WeaveError, WeaveResult};
use crate::executor::{BatchCommand, BatchResult, MappedStatement};
use crate::scripting::BoundSql;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded driver call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub statement_id: String,
    pub sql: String,
    pub values: Vec<Value>,
    pub timeout: Option<Duration>,
}

/// Everything the fake driver observed.
#[derive(Debug, Default)]
pub(crate) struct DriverJournal {
    pub queries: Vec<RecordedCall>,
    pub updates: Vec<RecordedCall>,
    pub cursors: Vec<RecordedCall>,
    pub batches: Vec<usize>,
    pub commits: u32,
    pub rollbacks: u32,
    pub closes: u32,
}

/// Test handle over the shared state of a fake transaction/handler pair.
#[derive(Clone, Default)]
pub(crate) struct FakeDriver {
    journal: Arc<Mutex<DriverJournal>>,
    rows_by_statement: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    out_params_by_statement: Arc<Mutex<HashMap<String, Map<String, Value>>>>,
    fail_next_query: Arc<AtomicBool>,
    transaction_timeout: Arc<Mutex<Option<Duration>>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned rows returned for a statement id.
    pub fn respond(&self, statement_id: &str, rows: Vec<Value>) {
        self.rows_by_statement
            .lock()
            .unwrap()
            .insert(statement_id.to_string(), rows);
    }

    /// Canned OUT-parameter values returned for a statement id.
    pub fn respond_out_params(&self, statement_id: &str, out: Map<String, Value>) {
        self.out_params_by_statement
            .lock()
            .unwrap()
            .insert(statement_id.to_string(), out);
    }

    /// Make the next query fail at the driver.
    pub fn fail_next_query(&self) {
        self.fail_next_query.store(true, Ordering::SeqCst);
    }

    pub fn set_transaction_timeout(&self, timeout: Duration) {
        *self.transaction_timeout.lock().unwrap() = Some(timeout);
    }

    pub fn journal(&self) -> std::sync::MutexGuard<'_, DriverJournal> {
        self.journal.lock().unwrap()
    }

    pub fn query_count(&self) -> usize {
        self.journal().queries.len()
    }

    pub fn handler(&self) -> Box<dyn StatementHandler> {
        Box::new(FakeHandler {
            driver: self.clone(),
        })
    }

    pub fn transaction(&self) -> Box<dyn Transaction> {
        Box::new(FakeTransaction {
            driver: self.clone(),
        })
    }
}

struct FakeHandler {
    driver: FakeDriver,
}

impl FakeHandler {
    fn record(
        &self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> RecordedCall {
        RecordedCall {
            statement_id: stmt.id().to_string(),
            sql: bound.sql().to_string(),
            values: values.to_vec(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl StatementHandler for FakeHandler {
    async fn query(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<QueryRows> {
        let call = self.record(stmt, bound, values, timeout);
        self.driver.journal.lock().unwrap().queries.push(call);
        if self.driver.fail_next_query.swap(false, Ordering::SeqCst) {
            return Err(WeaveError::build("injected driver failure"));
        }
        let rows = self
            .driver
            .rows_by_statement
            .lock()
            .unwrap()
            .get(stmt.id())
            .cloned()
            .unwrap_or_default();
        let out_params = self
            .driver
            .out_params_by_statement
            .lock()
            .unwrap()
            .get(stmt.id())
            .cloned();
        Ok(QueryRows { rows, out_params })
    }

    async fn update(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<u64> {
        let call = self.record(stmt, bound, values, timeout);
        self.driver.journal.lock().unwrap().updates.push(call);
        Ok(1)
    }

    async fn query_stream(
        &mut self,
        stmt: &MappedStatement,
        bound: &BoundSql,
        values: &[Value],
        timeout: Option<Duration>,
    ) -> WeaveResult<RowStream> {
        let call = self.record(stmt, bound, values, timeout);
        self.driver.journal.lock().unwrap().cursors.push(call);
        let rows = self
            .driver
            .rows_by_statement
            .lock()
            .unwrap()
            .get(stmt.id())
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(futures_util::stream::iter(
            rows.into_iter().map(Ok),
        )))
    }

    async fn run_batch(&mut self, commands: &[BatchCommand]) -> WeaveResult<Vec<BatchResult>> {
        self.driver
            .journal
            .lock()
            .unwrap()
            .batches
            .push(commands.len());
        let mut results: Vec<BatchResult> = Vec::new();
        for command in commands {
            match results
                .last_mut()
                .filter(|r| r.statement_id == command.statement_id)
            {
                Some(result) => result.update_counts.push(1),
                None => results.push(BatchResult {
                    statement_id: command.statement_id.clone(),
                    sql: command.bound.sql().to_string(),
                    update_counts: vec![1],
                }),
            }
        }
        Ok(results)
    }
}

struct FakeTransaction {
    driver: FakeDriver,
}

#[async_trait::async_trait]
impl Transaction for FakeTransaction {
    async fn commit(&mut self) -> WeaveResult<()> {
        self.driver.journal.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> WeaveResult<()> {
        self.driver.journal.lock().unwrap().rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) -> WeaveResult<()> {
        self.driver.journal.lock().unwrap().closes += 1;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        *self.driver.transaction_timeout.lock().unwrap()
    }
}
