//! Supabase (PostgREST) implementation of [`Backend`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{row_fields, validate_column, Backend, FilterOp, Query, Table};
use crate::error::BackendError;
use crate::realtime::ChangeFeed;
use crate::value_f64;

/// Default timeout for PostgREST requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Name of the SQL function performing the atomic stock adjustment.
const ADJUST_STOCK_RPC: &str = "ajuster_stock";

/// Read-then-conditional-write rounds before a stock adjustment gives up.
const STOCK_CAS_ATTEMPTS: usize = 5;

/// Hosted backend talking to a Supabase project over PostgREST.
///
/// Stock adjustments call the `ajuster_stock` SQL function shipped in
/// `supabase/migrations/20250301000000_ajuster_stock.sql`. Projects without
/// it fall back to conditional PATCHes on the quantity read.
pub struct SupabaseBackend {
    base_url: String,
    anon_key: String,
    client: Client,
    feed: ChangeFeed,
    /// Set once the project answered 404 for the stock function.
    rpc_missing: AtomicBool,
}

/// Normalise the project URL: trim, ensure a scheme, strip trailing slashes
/// and a trailing `/rest/v1`.
pub fn normalize_supabase_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }
    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> BackendError {
    if err.is_connect() {
        return BackendError::Network(format!("Cannot reach Supabase at {url}"));
    }
    if err.is_timeout() {
        return BackendError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return BackendError::Config(format!("Invalid Supabase URL: {url}"));
    }
    BackendError::Network(format!("Network error communicating with {url}: {err}"))
}

fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Supabase key is invalid or expired".to_string(),
        403 => "Access denied by row-level security".to_string(),
        404 => "Supabase table or function not found".to_string(),
        409 => "Conflicting row already exists".to_string(),
        s if s >= 500 => format!("Supabase server error (HTTP {s})"),
        s => format!("Unexpected response from Supabase (HTTP {s})"),
    }
}

/// Prefer the PostgREST `message` (plus `details`) over the generic text.
fn http_error(status: StatusCode, body_text: &str) -> BackendError {
    let message = match serde_json::from_str::<Value>(body_text) {
        Ok(body) => {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status_error(status));
            match body.get("details").and_then(Value::as_str) {
                Some(details) if !details.is_empty() => format!("{message}: {details}"),
                _ => message,
            }
        }
        Err(_) => status_error(status),
    };
    if status == StatusCode::FORBIDDEN {
        return BackendError::Forbidden(message);
    }
    BackendError::http(status.as_u16(), message)
}

/// Render a filter value in PostgREST syntax.
fn rest_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn filter_params(query: &Query) -> Vec<(String, String)> {
    query
        .filters
        .iter()
        .map(|f| {
            let rendered = match (f.op, &f.value) {
                (FilterOp::Eq, Value::Null) => "is.null".to_string(),
                (FilterOp::Neq, Value::Null) => "not.is.null".to_string(),
                (op, v) => format!("{}.{}", op.rest_op(), rest_value(v)),
            };
            (f.column.clone(), rendered)
        })
        .collect()
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range(header: &str) -> Option<usize> {
    header.rsplit('/').next()?.trim().parse().ok()
}

impl SupabaseBackend {
    pub fn new(url: &str, anon_key: &str) -> Result<Self, BackendError> {
        Self::with_timeout(url, anon_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: &str, anon_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let anon_key = anon_key.trim();
        if anon_key.is_empty() {
            return Err(BackendError::Config("missing Supabase anon key".into()));
        }
        let base_url = normalize_supabase_url(url);
        Url::parse(&base_url).map_err(|e| BackendError::Config(format!("Invalid Supabase URL: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            anon_key: anon_key.to_string(),
            client,
            feed: ChangeFeed::new(),
            rpc_missing: AtomicBool::new(false),
        })
    }

    async fn adjust_stock_rpc(&self, stock_id: &str, delta: f64) -> Result<f64, BackendError> {
        let id = stock_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(stock_id));
        let url = self.endpoint(&format!("rpc/{ADJUST_STOCK_RPC}"), &[])?;
        let req = self
            .request(Method::POST, url)
            .json(&json!({ "p_stock_id": id, "p_delta": delta }));
        let (body, _) = self.send(req).await?;

        // The function returns the new quantity, either bare or as a row.
        let quantity = match &body {
            Value::Number(n) => n.as_f64(),
            Value::Array(rows) => rows.first().and_then(|r| value_f64(r, &["quantite", "quantity"])),
            Value::Object(_) => value_f64(&body, &["quantite", "quantity"]),
            _ => None,
        }
        .ok_or_else(|| BackendError::NotFound(format!("stock {stock_id}")))?;
        self.feed.publish(Table::Stock);
        Ok(quantity)
    }

    /// Adjust with plain PostgREST calls. The PATCH only matches while the
    /// row still holds the quantity read, so a concurrent sale makes it
    /// match nothing and the round is retried.
    async fn adjust_stock_conditional(&self, stock_id: &str, delta: f64) -> Result<f64, BackendError> {
        for attempt in 1..=STOCK_CAS_ATTEMPTS {
            let rows = self
                .select(Table::Stock, &Query::by_id(stock_id).limit(1))
                .await?;
            let row = rows
                .first()
                .ok_or_else(|| BackendError::NotFound(format!("stock {stock_id}")))?;
            let read = row.get("quantite").cloned().unwrap_or(Value::Null);
            let current = value_f64(row, &["quantite"]).ok_or_else(|| {
                BackendError::Decode(format!("stock {stock_id} has no readable quantity"))
            })?;
            let next = current + delta;

            let changed = self
                .update(
                    Table::Stock,
                    &Query::by_id(stock_id).eq("quantite", read),
                    json!({ "quantite": next }),
                )
                .await?;
            if changed > 0 {
                return Ok(next);
            }
            debug!(stock_id, attempt, "stock changed while adjusting, retrying");
        }
        Err(BackendError::http(
            409,
            format!("stock {stock_id} kept changing, adjustment not applied"),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str, params: &[(String, String)]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{path}", self.base_url))
            .map_err(|e| BackendError::Config(format!("Invalid Supabase URL: {e}")))?;
        if !params.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .header("Content-Type", "application/json")
    }

    /// Send, map failures, and decode the JSON body (`Null` when empty).
    async fn send(&self, req: RequestBuilder) -> Result<(Value, Option<String>), BackendError> {
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let content_range = resp
            .headers()
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body_text, "Supabase request failed");
            return Err(http_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok((Value::Null, content_range));
        }
        let body = serde_json::from_str(&body_text)
            .map_err(|e| BackendError::Decode(format!("Supabase JSON parse error: {e}")))?;
        Ok((body, content_range))
    }

    fn rows(body: Value) -> Result<Vec<Value>, BackendError> {
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, BackendError> {
        query.validate()?;
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(query));
        if let Some(order) = &query.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        let url = self.endpoint(table.name(), &params)?;
        debug!(table = %table, "select");
        let (body, _) = self.send(self.request(Method::GET, url)).await?;
        Self::rows(body)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        row_fields(&row)?;
        let url = self.endpoint(table.name(), &[])?;
        let req = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&row);
        let (body, _) = self.send(req).await?;
        let stored = Self::rows(body)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("{table} insert returned no row")))?;
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
        if query.filters.is_empty() {
            return Err(BackendError::InvalidQuery("update without a filter is not allowed".into()));
        }
        row_fields(&patch)?;
        let url = self.endpoint(table.name(), &filter_params(query))?;
        let req = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&patch);
        let (body, _) = self.send(req).await?;
        let changed = Self::rows(body)?.len();
        if changed > 0 {
            self.feed.publish(table);
        }
        Ok(changed)
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, BackendError> {
        query.validate()?;
        if query.filters.is_empty() {
            return Err(BackendError::InvalidQuery("delete without a filter is not allowed".into()));
        }
        let url = self.endpoint(table.name(), &filter_params(query))?;
        let req = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation");
        let (body, _) = self.send(req).await?;
        let removed = Self::rows(body)?.len();
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
        row_fields(&row)?;
        let url = self.endpoint(
            table.name(),
            &[("on_conflict".to_string(), on_conflict.to_string())],
        )?;
        let req = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        let (body, _) = self.send(req).await?;
        let stored = Self::rows(body)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("{table} upsert returned no row")))?;
        self.feed.publish(table);
        Ok(stored)
    }

    async fn count(&self, table: Table, query: &Query) -> Result<usize, BackendError> {
        query.validate()?;
        let mut params = vec![
            ("select".to_string(), "id".to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        params.extend(filter_params(query));
        let url = self.endpoint(table.name(), &params)?;
        let req = self.request(Method::GET, url).header("Prefer", "count=exact");
        let (_, content_range) = self.send(req).await?;
        content_range
            .as_deref()
            .and_then(parse_content_range)
            .ok_or_else(|| BackendError::Decode("missing Content-Range count".into()))
    }

    async fn adjust_stock(&self, stock_id: &str, delta: f64) -> Result<f64, BackendError> {
        if !self.rpc_missing.load(Ordering::Relaxed) {
            match self.adjust_stock_rpc(stock_id, delta).await {
                Err(BackendError::Http { status: 404, .. }) => {
                    warn!(
                        function = ADJUST_STOCK_RPC,
                        "stock function missing, falling back to conditional updates"
                    );
                    self.rpc_missing.store(true, Ordering::Relaxed);
                }
                other => return other,
            }
        }
        self.adjust_stock_conditional(stock_id, delta).await
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}
