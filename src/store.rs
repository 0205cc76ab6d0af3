//! Boundary to the relational store.
//!
//! The engine never opens connections or transactions itself. Callers hand in
//! a [`StoreTx`] wrapping their own transaction; every statement the engine
//! runs goes through it together with the caller's [`ExecContext`].

use crate::catalog::types::Value;
use crate::error::EngineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Parameterized statement ready for execution. Placeholders are `$1..$n`
/// and `args[i]` binds `$(i + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreRow {
    pub values: Vec<Value>,
}

impl StoreRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    /// SQLSTATE reported by the store, if any.
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Transaction handle supplied by the caller.
///
/// Implementations must honour the context deadline for each statement where
/// the underlying driver supports it. Commit and rollback stay with the caller.
pub trait StoreTx {
    fn query(&mut self, ctx: &ExecContext, statement: &Statement)
    -> Result<Vec<StoreRow>, StoreError>;

    /// Runs a statement without result rows and reports affected rows.
    fn execute(&mut self, ctx: &ExecContext, statement: &Statement) -> Result<u64, StoreError>;
}

/// Caller deadline and cancellation flag, checked before every statement.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining time before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Shared flag other threads can flip to cancel in-flight work.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(EngineError::Timeout);
        }
        Ok(())
    }
}

pub(crate) fn run_query(
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    statement: &Statement,
) -> Result<Vec<StoreRow>, EngineError> {
    ctx.check()?;
    Ok(tx.query(ctx, statement)?)
}

pub(crate) fn run_execute(
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    statement: &Statement,
) -> Result<u64, EngineError> {
    ctx.check()?;
    Ok(tx.execute(ctx, statement)?)
}
