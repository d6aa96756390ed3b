/// Transaction Module
///
/// Explicit transactions around a session's statements. While a
/// transaction is active autocommit is off; ending it commits unless a fatal
/// error was recorded since it began, in which case it rolls back. The
/// rollback flag belongs to the `StatsCollector` and is only ever raised by
/// logging a fatal error.

use super::connection::{lock_connection, SharedConnection};
use super::stats::StatsCollector;
use crate::core::{DbError, Result};
use tracing::{info, warn};

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    Idle,
    /// Transaction in progress
    Active,
    /// Transaction in progress that will roll back when ended
    PendingRollback,
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::Idle
    }
}

/// How the last transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

#[derive(Debug, Default)]
pub struct TransactionController {
    active: bool,
    last_outcome: Option<TransactionOutcome>,
}

impl TransactionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self, stats: &StatsCollector) -> TransactionState {
        match (self.active, stats.rollback_pending()) {
            (false, _) => TransactionState::Idle,
            (true, false) => TransactionState::Active,
            (true, true) => TransactionState::PendingRollback,
        }
    }

    pub fn last_outcome(&self) -> Option<TransactionOutcome> {
        self.last_outcome
    }

    /// Starts a transaction on `conn` unless one is already active.
    ///
    /// Returns whether a transaction is active afterwards.
    pub fn begin(&mut self, conn: &SharedConnection, stats: &mut StatsCollector) -> Result<bool> {
        if !self.active {
            lock_connection(conn)?
                .set_autocommit(false)
                .map_err(|e| DbError::Transaction(format!("cannot disable autocommit: {}", e)))?;
            stats.clear_rollback();
            self.active = true;
            info!("Transaction started");
        }
        Ok(self.active)
    }

    /// Commits or rolls back the active transaction and restores autocommit.
    ///
    /// Returns whether a transaction is active afterwards, which is always `false`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Transaction` if the commit fails; the transaction is
    /// rolled back in that case.
    pub fn end(&mut self, conn: &SharedConnection, stats: &mut StatsCollector) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        self.active = false;

        let mut guard = lock_connection(conn)?;
        let outcome = if stats.take_rollback() {
            guard
                .rollback()
                .map_err(|e| DbError::Transaction(format!("rollback failed: {}", e)))?;
            TransactionOutcome::RolledBack
        } else {
            match guard.commit() {
                Ok(()) => TransactionOutcome::Committed,
                Err(e) => {
                    warn!("Commit failed, rolling back: {}", e);
                    if let Err(rb) = guard.rollback() {
                        warn!("Rollback after failed commit failed: {}", rb);
                    }
                    if let Err(ac) = guard.set_autocommit(true) {
                        warn!("Cannot enable autocommit after failed commit: {}", ac);
                    }
                    self.last_outcome = Some(TransactionOutcome::RolledBack);
                    return Err(DbError::Transaction(format!("commit failed: {}", e)));
                }
            }
        };

        guard
            .set_autocommit(true)
            .map_err(|e| DbError::Transaction(format!("cannot enable autocommit: {}", e)))?;
        self.last_outcome = Some(outcome);
        info!(?outcome, "Transaction ended");
        Ok(false)
    }
}
