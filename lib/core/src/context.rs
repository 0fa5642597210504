use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Whether a graph is evaluated to index entities or to build a query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionEnvironment {
    Ingestion,
    Query,
}

/// Per-evaluation settings shared by every node of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    environment: ExecutionEnvironment,
    now: i64,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(environment: ExecutionEnvironment, now: i64) -> Self {
        Self { environment, now }
    }

    #[must_use]
    pub fn ingestion(now: i64) -> Self {
        Self::new(ExecutionEnvironment::Ingestion, now)
    }

    #[must_use]
    pub fn query(now: i64) -> Self {
        Self::new(ExecutionEnvironment::Query, now)
    }

    #[inline]
    #[must_use]
    pub fn environment(&self) -> ExecutionEnvironment {
        self.environment
    }

    #[inline]
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.environment == ExecutionEnvironment::Query
    }

    /// Evaluation time in seconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub fn now(&self) -> i64 {
        self.now
    }
}

/// Current system time in seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
