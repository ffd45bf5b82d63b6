use std::time::Duration;

use crate::common::TRANSACTION_RETRY_BUDGET_SECS;

/// Read isolation requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Snapshot,
}

/// Acknowledgement requested for transaction writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcernLevel {
    Nodes(u32),
    Majority,
}

/// Options of one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    pub read_concern: Option<ReadConcernLevel>,
    pub write_concern: Option<WriteConcernLevel>,
    pub max_commit_time: Option<Duration>,
    /// How long transient failures are retried before the last error is
    /// returned. Defaults to 120 seconds.
    pub retry_budget: Option<Duration>,
}

impl TransactionOptions {
    pub fn new() -> TransactionOptions {
        TransactionOptions::default()
    }

    pub fn read_concern(mut self, level: ReadConcernLevel) -> Self {
        self.read_concern = Some(level);
        self
    }

    pub fn write_concern(mut self, level: WriteConcernLevel) -> Self {
        self.write_concern = Some(level);
        self
    }

    pub fn retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    pub fn effective_retry_budget(&self) -> Duration {
        self.retry_budget
            .unwrap_or(Duration::from_secs(TRANSACTION_RETRY_BUDGET_SECS))
    }
}

/// Options of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub causal_consistency: Option<bool>,
    /// Applied to every transaction started on the session.
    pub default_transaction_options: Option<TransactionOptions>,
}

impl SessionOptions {
    pub fn new() -> SessionOptions {
        SessionOptions::default()
    }

    pub fn causal_consistency(mut self, enabled: bool) -> Self {
        self.causal_consistency = Some(enabled);
        self
    }

    pub fn default_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.default_transaction_options = Some(options);
        self
    }
}
