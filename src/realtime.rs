//! Per-table change notifications.
//!
//! Subscribers only learn *that* a collection changed; they refetch what they
//! display. The local store publishes after each of its own writes. For the
//! hosted store, [`ChangePoller`] reads the watched tables on an interval
//! and publishes whenever a table's row digest moves.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Query, Table};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub at: DateTime<Utc>,
}

/// One broadcast channel per collection.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    senders: HashMap<Table, broadcast::Sender<ChangeEvent>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let senders = Table::ALL
            .into_iter()
            .map(|table| (table, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();
        Self { senders }
    }

    pub fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        match self.senders.get(&table) {
            Some(tx) => tx.subscribe(),
            // Every table gets a sender in `new`; keep the signature total.
            None => broadcast::channel(1).1,
        }
    }

    /// Notify subscribers of `table`. Having no subscriber is not an error.
    pub fn publish(&self, table: Table) {
        if let Some(tx) = self.senders.get(&table) {
            let receivers = tx
                .send(ChangeEvent {
                    table,
                    at: Utc::now(),
                })
                .unwrap_or(0);
            debug!(table = %table, receivers, "change published");
        }
    }
}

// ---------------------------------------------------------------------------
// Digest poller
// ---------------------------------------------------------------------------

fn rows_digest(rows: &[serde_json::Value]) -> String {
    let serialized = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

/// Read each table once and return those whose digest differs from the last
/// one recorded in `digests`. The first observation of a table only records
/// its baseline.
pub async fn poll_once(
    backend: &dyn Backend,
    tables: &[Table],
    digests: &mut HashMap<Table, String>,
) -> Vec<Table> {
    let mut changed = Vec::new();
    for &table in tables {
        let rows = match backend.select(table, &Query::new().order("id", true)).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = %table, error = %e, "change poll failed");
                continue;
            }
        };
        let digest = rows_digest(&rows);
        match digests.insert(table, digest.clone()) {
            Some(previous) if previous != digest => changed.push(table),
            _ => {}
        }
    }
    changed
}

/// Background poller publishing hosted-table changes onto the backend feed.
pub struct ChangePoller {
    is_running: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
}

impl ChangePoller {
    pub fn start(backend: Arc<dyn Backend>, tables: Vec<Table>, interval: Duration) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        let (cancel, mut cancelled) = watch::channel(false);
        let running = is_running.clone();

        tokio::spawn(async move {
            info!(tables = tables.len(), interval_secs = interval.as_secs(), "change poller started");
            let mut digests = HashMap::new();
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                for table in poll_once(backend.as_ref(), &tables, &mut digests).await {
                    backend.feed().publish(table);
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancelled.changed() => break,
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("change poller stopped");
        });

        Self { is_running, cancel }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        let _ = self.cancel.send(true);
    }
}

impl Drop for ChangePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_table_subscribers_only() {
        let feed = ChangeFeed::new();
        let mut stock_rx = feed.subscribe(Table::Stock);
        let mut menu_rx = feed.subscribe(Table::Menu);

        feed.publish(Table::Stock);

        let event = stock_rx.recv().await.expect("stock event");
        assert_eq!(event.table, Table::Stock);
        assert!(menu_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        ChangeFeed::new().publish(Table::KitchenTickets);
    }

    #[tokio::test]
    async fn test_poll_once_detects_changes_after_baseline() {
        let backend = SqliteBackend::open_in_memory().expect("open backend");
        let mut digests = HashMap::new();
        let tables = [Table::Stock, Table::Menu];

        assert!(poll_once(&backend, &tables, &mut digests).await.is_empty());

        backend
            .insert(Table::Stock, json!({ "nom": "Riz", "quantite": 10 }))
            .await
            .expect("insert stock");
        assert_eq!(poll_once(&backend, &tables, &mut digests).await, vec![Table::Stock]);
        assert!(poll_once(&backend, &tables, &mut digests).await.is_empty());
    }

    #[tokio::test]
    async fn test_poller_stops() {
        let backend: Arc<dyn Backend> = Arc::new(SqliteBackend::open_in_memory().expect("open"));
        let poller = ChangePoller::start(backend, vec![Table::Stock], Duration::from_millis(10));
        assert!(poller.is_running());
        poller.stop();
        assert!(!poller.is_running());
    }
}
