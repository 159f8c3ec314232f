//! Role checks at the data layer.
//!
//! Wraps another backend for the duration of a staff session. Reads pass
//! through; every write is checked against the session role first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{Backend, Query, Table};
use crate::auth::{require, Permission, Role};
use crate::error::BackendError;
use crate::realtime::ChangeFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Create,
    Modify,
    Remove,
}

/// Permission a role needs to perform `write` on `table`.
fn write_permission(table: Table, write: Write) -> Permission {
    match (table, write) {
        (Table::Stock, _) => Permission::EditStock,
        (Table::Menu | Table::Categories | Table::RecipeLinks, _) => Permission::ManageMenu,
        (Table::Employees, _) => Permission::ManageStaff,
        (Table::KitchenTickets, Write::Create) => Permission::Sell,
        (Table::KitchenTickets, _) => Permission::Kitchen,
        (Table::Transactions | Table::CustomerOrders | Table::Customers, Write::Create) => {
            Permission::Sell
        }
        // Customer records are refreshed on every checkout.
        (Table::Customers, Write::Modify) => Permission::Sell,
        // Rewriting sales history is reserved to whoever reads the reports.
        (Table::Transactions | Table::CustomerOrders | Table::Customers, _) => {
            Permission::ViewReports
        }
    }
}

pub struct GuardedBackend {
    inner: Arc<dyn Backend>,
    role: Role,
}

impl GuardedBackend {
    pub fn new(inner: Arc<dyn Backend>, role: Role) -> Self {
        Self { inner, role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn check(&self, table: Table, write: Write) -> Result<(), BackendError> {
        let permission = write_permission(table, write);
        require(self.role, permission).map_err(|e| {
            warn!(role = %self.role, table = %table, ?permission, "write refused");
            e
        })
    }
}

#[async_trait]
impl Backend for GuardedBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.inner.select(table, query).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        self.check(table, Write::Create)?;
        self.inner.insert(table, row).await
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<usize, BackendError> {
        self.check(table, Write::Modify)?;
        self.inner.update(table, query, patch).await
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, BackendError> {
        self.check(table, Write::Remove)?;
        self.inner.delete(table, query).await
    }

    async fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: &str,
    ) -> Result<Value, BackendError> {
        // An upsert may land either way; require both.
        self.check(table, Write::Create)?;
        self.check(table, Write::Modify)?;
        self.inner.upsert(table, row, on_conflict).await
    }

    async fn count(&self, table: Table, query: &Query) -> Result<usize, BackendError> {
        self.inner.count(table, query).await
    }

    async fn adjust_stock(&self, stock_id: &str, delta: f64) -> Result<f64, BackendError> {
        require(self.role, Permission::ConsumeStock)?;
        self.inner.adjust_stock(stock_id, delta).await
    }

    fn feed(&self) -> &ChangeFeed {
        self.inner.feed()
    }
}
