//! Local SQLite implementation of [`Backend`].
//!
//! Rows are exchanged as JSON objects keyed by column name. JSON document
//! columns (`items`, `articles`) are stored as text and parsed back on read.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Statement};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{row_fields, validate_column, Backend, FilterOp, Query, Table};
use crate::db::{self, DbState};
use crate::error::BackendError;
use crate::realtime::ChangeFeed;

pub struct SqliteBackend {
    db: DbState,
    feed: ChangeFeed,
}

impl SqliteBackend {
    /// Open (and migrate) `{data_dir}/mont-pos.db`.
    pub fn open(data_dir: &Path) -> Result<Self, BackendError> {
        let db = db::init(data_dir).map_err(BackendError::Storage)?;
        Ok(Self {
            db,
            feed: ChangeFeed::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = db::open_in_memory().map_err(BackendError::Storage)?;
        Ok(Self {
            db: DbState {
                conn: Mutex::new(conn),
                db_path: PathBuf::from(":memory:"),
            },
            feed: ChangeFeed::new(),
        })
    }

    /// Underlying database, for `local_settings` access.
    pub fn db(&self) -> &DbState {
        &self.db
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, BackendError> {
        self.db
            .conn
            .lock()
            .map_err(|e| BackendError::Storage(format!("connection lock poisoned: {e}")))
    }
}

// ---------------------------------------------------------------------------
// JSON <-> SQL conversion
// ---------------------------------------------------------------------------

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Arrays and objects land in JSON text columns.
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>, is_json: bool) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => {
            let s = String::from_utf8_lossy(t).into_owned();
            if is_json {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            } else {
                Value::String(s)
            }
        }
    }
}

fn read_rows(
    stmt: &mut Statement<'_>,
    params: &[SqlValue],
    json_columns: &[&str],
) -> Result<Vec<Value>, BackendError> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let is_json = json_columns.contains(&name.as_str());
            map.insert(name.clone(), from_sql(row.get_ref(idx)?, is_json));
        }
        out.push(Value::Object(map));
    }
    Ok(out)
}

/// `WHERE ...` clause for `query`, with parameters numbered from `first`.
fn where_clause(query: &Query, first: usize) -> (String, Vec<SqlValue>) {
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for filter in &query.filters {
        match (filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => parts.push(format!("{} IS NULL", filter.column)),
            (FilterOp::Neq, Value::Null) => parts.push(format!("{} IS NOT NULL", filter.column)),
            (op, value) => {
                params.push(to_sql(value));
                parts.push(format!(
                    "{} {} ?{}",
                    filter.column,
                    op.sql_op(),
                    first + params.len() - 1
                ));
            }
        }
    }
    if parts.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", parts.join(" AND ")), params)
    }
}

/// Writes must target rows explicitly, as PostgREST requires.
fn require_filters(query: &Query, action: &str) -> Result<(), BackendError> {
    if query.filters.is_empty() {
        return Err(BackendError::InvalidQuery(format!(
            "{action} without a filter is not allowed"
        )));
    }
    Ok(())
}

fn select_by_id(conn: &Connection, table: Table, id: i64) -> Result<Value, BackendError> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {table} WHERE id = ?1"))?;
    read_rows(&mut stmt, &[SqlValue::Integer(id)], table.json_columns())?
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::NotFound(format!("{table} row {id}")))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[async_trait]
impl Backend for SqliteBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, BackendError> {
        query.validate()?;
        let (where_sql, params) = where_clause(query, 1);
        let mut sql = format!("SELECT * FROM {table}{where_sql}");
        if let Some(order) = &query.order {
            let dir = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {} {dir}", order.column));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        read_rows(&mut stmt, &params, table.json_columns())
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        let fields = row_fields(&row)?;
        let stored = {
            let conn = self.lock()?;
            if fields.is_empty() {
                conn.execute(&format!("INSERT INTO {table} DEFAULT VALUES"), [])?;
            } else {
                let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|i| format!("?{i}")).collect();
                let values: Vec<SqlValue> = fields.values().map(to_sql).collect();
                conn.execute(
                    &format!(
                        "INSERT INTO {table} ({}) VALUES ({})",
                        columns.join(", "),
                        placeholders.join(", ")
                    ),
                    params_from_iter(values.iter()),
                )?;
            }
            select_by_id(&conn, table, conn.last_insert_rowid())?
        };
        debug!(table = %table, "row inserted");
        self.feed.publish(table);
        Ok(stored)
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<usize, BackendError> {
        query.validate()?;
        require_filters(query, "update")?;
        let fields = row_fields(&patch)?;
        if fields.is_empty() {
            return Err(BackendError::InvalidQuery("empty update patch".into()));
        }

        let assignments: Vec<String> = fields
            .keys()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect();
        let mut params: Vec<SqlValue> = fields.values().map(to_sql).collect();
        let (where_sql, where_params) = where_clause(query, params.len() + 1);
        params.extend(where_params);

        let changed = {
            let conn = self.lock()?;
            conn.execute(
                &format!("UPDATE {table} SET {}{where_sql}", assignments.join(", ")),
                params_from_iter(params.iter()),
            )?
        };
        if changed > 0 {
            self.feed.publish(table);
        }
        Ok(changed)
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, BackendError> {
        query.validate()?;
        require_filters(query, "delete")?;
        let (where_sql, params) = where_clause(query, 1);
        let removed = {
            let conn = self.lock()?;
            conn.execute(
                &format!("DELETE FROM {table}{where_sql}"),
                params_from_iter(params.iter()),
            )?
        };
        if removed > 0 {
            self.feed.publish(table);
        }
        Ok(removed)
    }

    async fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: &str,
    ) -> Result<Value, BackendError> {
        validate_column(on_conflict)?;
        let fields = row_fields(&row)?;
        let key = fields.get(on_conflict).cloned().ok_or_else(|| {
            BackendError::InvalidQuery(format!("upsert row lacks conflict column '{on_conflict}'"))
        })?;

        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = columns
            .iter()
            .map(|col| format!("{col} = excluded.{col}"))
            .collect();
        let values: Vec<SqlValue> = fields.values().map(to_sql).collect();

        let stored = {
            let conn = self.lock()?;
            conn.execute(
                &format!(
                    "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT({on_conflict}) DO UPDATE SET {}",
                    columns.join(", "),
                    placeholders.join(", "),
                    updates.join(", ")
                ),
                params_from_iter(values.iter()),
            )?;
            let mut stmt =
                conn.prepare(&format!("SELECT * FROM {table} WHERE {on_conflict} = ?1"))?;
            read_rows(&mut stmt, &[to_sql(&key)], table.json_columns())?
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::NotFound(format!("{table} row after upsert")))?
        };
        self.feed.publish(table);
        Ok(stored)
    }

    async fn count(&self, table: Table, query: &Query) -> Result<usize, BackendError> {
        query.validate()?;
        let (where_sql, params) = where_clause(query, 1);
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn adjust_stock(&self, stock_id: &str, delta: f64) -> Result<f64, BackendError> {
        let quantity: Option<f64> = {
            let conn = self.lock()?;
            conn.query_row(
                "UPDATE stock
                 SET quantite = quantite + ?1,
                     derniere_mise_a_jour = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2
                 RETURNING quantite",
                rusqlite::params![delta, stock_id],
                |row| row.get(0),
            )
            .optional()?
        };
        let quantity = quantity.ok_or_else(|| BackendError::NotFound(format!("stock {stock_id}")))?;
        debug!(stock_id, delta, quantity, "stock adjusted");
        self.feed.publish(Table::Stock);
        Ok(quantity)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_f64;
    use std::sync::Arc;

    fn backend() -> SqliteBackend {
        SqliteBackend::open_in_memory().expect("open in-memory backend")
    }

    #[tokio::test]
    async fn test_insert_returns_stored_row() {
        let b = backend();
        let row = b
            .insert(Table::Stock, json!({ "nom": "Riz", "quantite": 25 }))
            .await
            .expect("insert");
        assert_eq!(row["id"], json!(1));
        assert_eq!(row["unite"], json!("pcs"));
        assert_eq!(value_f64(&row, &["quantite"]), Some(25.0));
    }

    #[tokio::test]
    async fn test_json_columns_round_trip() {
        let b = backend();
        let items = json!([{ "nom": "Garba", "quantite": 2 }]);
        let row = b
            .insert(
                Table::KitchenTickets,
                json!({ "transaction_id": "7", "items": items.clone(), "statut": "en_attente" }),
            )
            .await
            .expect("insert ticket");
        assert_eq!(row["items"], items);
    }

    #[tokio::test]
    async fn test_select_filters_order_and_limit() {
        let b = backend();
        for (nom, q) in [("Oignon", 3), ("Ail", 12), ("Tomate", 8)] {
            b.insert(Table::Stock, json!({ "nom": nom, "quantite": q }))
                .await
                .expect("seed");
        }
        let rows = b
            .select(
                Table::Stock,
                &Query::new().gte("quantite", 5).order("nom", true).limit(5),
            )
            .await
            .expect("select");
        let names: Vec<&str> = rows.iter().filter_map(|r| r["nom"].as_str()).collect();
        assert_eq!(names, vec!["Ail", "Tomate"]);

        let none = b
            .select(Table::Stock, &Query::new().eq("nom", "Poivre"))
            .await
            .expect("select");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_require_filter() {
        let b = backend();
        let err = b
            .update(Table::Stock, &Query::new(), json!({ "quantite": 0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidQuery(_)));
        assert!(b.delete(Table::Stock, &Query::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_by_id_counts_rows() {
        let b = backend();
        let row = b
            .insert(Table::Menu, json!({ "nom": "Alloco", "prix": 1000 }))
            .await
            .expect("insert");
        let id = row["id"].to_string();
        let n = b
            .update(Table::Menu, &Query::by_id(&id), json!({ "actif": false }))
            .await
            .expect("update");
        assert_eq!(n, 1);
        let rows = b
            .select(Table::Menu, &Query::new().eq("actif", true))
            .await
            .expect("select");
        assert!(rows.is_empty());
        assert_eq!(b.delete(Table::Menu, &Query::by_id(&id)).await.expect("delete"), 1);
    }

    #[tokio::test]
    async fn test_upsert_merges_on_conflict_column() {
        let b = backend();
        let first = b
            .upsert(
                Table::Customers,
                json!({ "nom": "Fatou", "telephone": "0102030405" }),
                "telephone",
            )
            .await
            .expect("first upsert");
        let second = b
            .upsert(
                Table::Customers,
                json!({ "nom": "Fatou B.", "telephone": "0102030405" }),
                "telephone",
            )
            .await
            .expect("second upsert");
        assert_eq!(first["id"], second["id"]);
        assert_eq!(second["nom"], json!("Fatou B."));
        assert_eq!(b.count(Table::Customers, &Query::new()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_adjust_stock_is_atomic_under_concurrency() {
        let b = Arc::new(backend());
        b.insert(Table::Stock, json!({ "nom": "Poulet", "quantite": 100 }))
            .await
            .expect("seed");

        let mut handles = Vec::new();
        for _ in 0..20 {
            let b = b.clone();
            handles.push(tokio::spawn(async move { b.adjust_stock("1", -2.0).await }));
        }
        for h in handles {
            h.await.expect("join").expect("adjust");
        }
        let rows = b
            .select(Table::Stock, &Query::by_id("1"))
            .await
            .expect("select");
        assert_eq!(value_f64(&rows[0], &["quantite"]), Some(60.0));
    }

    #[tokio::test]
    async fn test_adjust_missing_stock_is_not_found() {
        let b = backend();
        let err = b.adjust_stock("42", -1.0).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_writes_publish_changes() {
        let b = backend();
        let mut rx = b.subscribe(Table::Stock);
        b.insert(Table::Stock, json!({ "nom": "Huile", "quantite": 4 }))
            .await
            .expect("insert");
        assert_eq!(rx.recv().await.expect("event").table, Table::Stock);
    }

    #[tokio::test]
    async fn test_null_filter_uses_is_null() {
        let b = backend();
        b.insert(Table::Stock, json!({ "nom": "Sel", "quantite": 1 }))
            .await
            .expect("insert");
        let rows = b
            .select(Table::Stock, &Query::new().eq("fournisseur", Value::Null))
            .await
            .expect("select");
        assert_eq!(rows.len(), 1);
    }
}
