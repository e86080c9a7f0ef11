// Remote data service abstraction
//
// The resilience layer never talks to a concrete database. It consumes this
// trait, which covers the four row operations the campaign tool issues plus a
// lightweight ping used by the connectivity monitor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// A single row as returned by the data service
pub type Row = Value;

/// Sort order for a select
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Row filter: equality conditions, optional ordering and limit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub eq: Vec<(String, Value)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Create an empty filter (matches every row)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((column.into(), value.into()));
        self
    }

    /// Order ascending by column
    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            ascending: true,
        });
        self
    }

    /// Order descending by column
    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            ascending: false,
        });
        self
    }

    /// Limit the number of returned rows
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check whether a row satisfies every equality condition
    pub fn matches(&self, row: &Row) -> bool {
        self.eq
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Remote data service consumed by the coordinator
///
/// Implementations map these calls onto the hosted database. All methods
/// return the affected rows so writes can be echoed back to the caller.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Select rows matching the filter
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, RemoteError>;

    /// Insert a row and return it as stored
    async fn insert(&self, table: &str, row: Row) -> Result<Vec<Row>, RemoteError>;

    /// Merge `patch` into every row matching the filter
    async fn update(&self, table: &str, filter: &Filter, patch: Row)
        -> Result<Vec<Row>, RemoteError>;

    /// Delete rows matching the filter and return them
    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, RemoteError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), RemoteError>;
}
