/// Query statistics and the error log.
///
/// Every public call through the session bumps the executed-query counter.
/// With live stats enabled, each call also appends one `QueryStat`. Every
/// recorded error appends one `ErrorRecord`; fatal ones raise the rollback
/// flag that the transaction controller consults when it ends.

use crate::core::{DbError, Severity};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

/// Timing and size of one public call.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStat {
    pub query: String,
    pub number_results: u64,
    pub elapsed: Duration,
    /// Bytes buffered for the materialized result set
    pub memory_bytes: usize,
    pub error: Option<String>,
    pub within_transaction: bool,
}

/// One entry of the error log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub query: Option<String>,
    /// Value of the executed-query counter when the error happened
    pub query_number: u64,
    pub errno: i32,
    pub severity: Severity,
    pub error: String,
}

/// Start of a call being measured.
#[derive(Debug, Clone, Copy)]
pub struct CallProbe {
    started: Instant,
}

impl CallProbe {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Default)]
pub struct StatsCollector {
    keep_live_log: bool,
    live_stats: Vec<QueryStat>,
    errors: Vec<ErrorRecord>,
    executed_queries: u64,
    latest_error: Option<String>,
    rollback_pending: bool,
}

impl StatsCollector {
    pub fn new(keep_live_log: bool) -> Self {
        StatsCollector {
            keep_live_log,
            ..Self::default()
        }
    }

    pub fn set_keep_live_log(&mut self, enabled: bool) {
        self.keep_live_log = enabled;
    }

    pub fn keep_live_log(&self) -> bool {
        self.keep_live_log
    }

    /// Starts measuring a call and clears the latest-error flag.
    pub fn begin_call(&mut self) -> CallProbe {
        self.latest_error = None;
        CallProbe {
            started: Instant::now(),
        }
    }

    pub fn count_query(&mut self) {
        self.executed_queries += 1;
    }

    /// Appends `error` to the error log.
    pub fn record_error(&mut self, query: Option<&str>, error: &DbError) {
        let severity = error.severity();
        let message = error.message();
        let formatted = if message.is_empty() {
            "(not specified)".to_string()
        } else if severity == Severity::NonFatal {
            format!("[NOTICE] {}", message)
        } else {
            format!("[ERROR] {}", message)
        };

        if severity == Severity::Fatal {
            self.rollback_pending = true;
            self.latest_error = Some(format!("[{}] {}", error.errno(), message));
        }

        warn!(
            errno = error.errno(),
            query_number = self.executed_queries,
            "{}",
            formatted
        );
        self.errors.push(ErrorRecord {
            query: query.map(str::to_string),
            query_number: self.executed_queries,
            errno: error.errno(),
            severity,
            error: formatted,
        });
    }

    /// Appends a live-stats entry when live stats are enabled.
    pub fn record_query(
        &mut self,
        probe: CallProbe,
        query: &str,
        number_results: u64,
        memory_bytes: usize,
        within_transaction: bool,
    ) -> bool {
        if !self.keep_live_log {
            return false;
        }
        self.live_stats.push(QueryStat {
            query: query.to_string(),
            number_results,
            elapsed: probe.elapsed(),
            memory_bytes,
            error: self.latest_error.clone(),
            within_transaction,
        });
        true
    }

    pub fn rollback_pending(&self) -> bool {
        self.rollback_pending
    }

    /// Returns the rollback flag and clears it.
    pub fn take_rollback(&mut self) -> bool {
        std::mem::take(&mut self.rollback_pending)
    }

    pub fn clear_rollback(&mut self) {
        self.rollback_pending = false;
    }

    pub fn latest_error(&self) -> Option<&str> {
        self.latest_error.as_deref()
    }

    pub fn live_stats(&self) -> &[QueryStat] {
        &self.live_stats
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn executed_queries(&self) -> u64 {
        self.executed_queries
    }
}
