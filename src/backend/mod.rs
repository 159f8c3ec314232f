//! Data backend seam.
//!
//! Every read and write of domain rows goes through [`Backend`]. Two stores
//! implement it: the hosted Supabase project ([`SupabaseBackend`]) and a
//! local SQLite file with the same collections ([`SqliteBackend`]), which is
//! also what the test suites run against. [`GuardedBackend`] wraps either one
//! and checks the acting role before any write is forwarded.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::BackendError;
use crate::realtime::{ChangeEvent, ChangeFeed};

mod guarded;
mod sqlite;
mod supabase;

pub use guarded::GuardedBackend;
pub use sqlite::SqliteBackend;
pub use supabase::{normalize_supabase_url, SupabaseBackend, DEFAULT_TIMEOUT};

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Named collections of the restaurant schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Menu,
    Categories,
    Stock,
    Employees,
    Transactions,
    KitchenTickets,
    CustomerOrders,
    Customers,
    RecipeLinks,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::Menu,
        Table::Categories,
        Table::Stock,
        Table::Employees,
        Table::Transactions,
        Table::KitchenTickets,
        Table::CustomerOrders,
        Table::Customers,
        Table::RecipeLinks,
    ];

    /// Collection name on the backend.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Menu => "menu",
            Table::Categories => "categories",
            Table::Stock => "stock",
            Table::Employees => "employes",
            Table::Transactions => "transactions",
            Table::KitchenTickets => "preparation_cuisine",
            Table::CustomerOrders => "commandes",
            Table::Customers => "clients",
            Table::RecipeLinks => "menu_recettes",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Columns holding JSON documents (stored as text locally).
    pub fn json_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Transactions | Table::KitchenTickets => &["items"],
            Table::CustomerOrders => &["articles"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gte,
    Lt,
}

impl FilterOp {
    /// PostgREST operator prefix.
    pub fn rest_op(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
        }
    }

    pub fn sql_op(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "<>",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortOrder {
    pub column: String,
    pub ascending: bool,
}

/// Filters, ordering and limit for a collection read or a targeted write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(SortOrder {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Shorthand for the single-row `id = ?` target of updates and deletes.
    pub fn by_id(id: &str) -> Self {
        Self::new().eq("id", id)
    }

    /// Reject column names that are not plain identifiers. Both stores
    /// splice column names into the request, so this runs before either.
    pub fn validate(&self) -> Result<(), BackendError> {
        let columns = self
            .filters
            .iter()
            .map(|f| f.column.as_str())
            .chain(self.order.as_ref().map(|o| o.column.as_str()));
        for column in columns {
            validate_column(column)?;
        }
        for filter in &self.filters {
            if filter.value.is_array() || filter.value.is_object() {
                return Err(BackendError::InvalidQuery(format!(
                    "filter on '{}' must compare a scalar",
                    filter.column
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_column(column: &str) -> Result<(), BackendError> {
    let ok = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(BackendError::InvalidQuery(format!("bad column name '{column}'")))
    }
}

/// Validate every key of a row/patch object and return its fields.
pub(crate) fn row_fields(row: &Value) -> Result<&serde_json::Map<String, Value>, BackendError> {
    let fields = row
        .as_object()
        .ok_or_else(|| BackendError::InvalidQuery("row must be a JSON object".into()))?;
    for key in fields.keys() {
        validate_column(key)?;
    }
    Ok(fields)
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Hosted or local store of the restaurant collections.
///
/// Writes return the stored representation (including generated ids) or the
/// number of affected rows. Implementations publish a [`ChangeEvent`] on
/// their feed after every successful write.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError>;

    /// Apply `patch` to every row matching `query`; returns the match count.
    async fn update(&self, table: Table, query: &Query, patch: Value)
        -> Result<usize, BackendError>;

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, BackendError>;

    /// Insert, or merge into the row whose `on_conflict` column matches.
    async fn upsert(&self, table: Table, row: Value, on_conflict: &str)
        -> Result<Value, BackendError>;

    async fn count(&self, table: Table, query: &Query) -> Result<usize, BackendError>;

    /// Atomically add `delta` to a stock unit's quantity and return the new
    /// quantity. Concurrent callers never lose each other's adjustments.
    async fn adjust_stock(&self, stock_id: &str, delta: f64) -> Result<f64, BackendError>;

    fn feed(&self) -> &ChangeFeed;

    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        self.feed().subscribe(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::KitchenTickets.name(), "preparation_cuisine");
        assert_eq!(Table::from_name("orders"), None);
    }

    #[test]
    fn test_query_rejects_injected_column() {
        let q = Query::new().eq("nom; DROP TABLE stock", "x");
        assert!(matches!(q.validate(), Err(BackendError::InvalidQuery(_))));
        let q = Query::new().eq("nom", "x").order("created_at", false).limit(3);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_query_rejects_array_filter_value() {
        let q = Query::new().eq("id", serde_json::json!([1, 2]));
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_row_fields_requires_object() {
        assert!(row_fields(&serde_json::json!([1])).is_err());
        assert!(row_fields(&serde_json::json!({ "bad-key": 1 })).is_err());
        assert!(row_fields(&serde_json::json!({ "nom": "x" })).is_ok());
    }
}
