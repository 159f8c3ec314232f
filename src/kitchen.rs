//! Kitchen tickets: emission at sale time and the preparation queue.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::backend::{Backend, Query, Table};
use crate::error::{BackendError, PosError};
use crate::types::{CartLine, KitchenTicket, TicketLine, TicketStatus};

/// Ticket lines for a cart, in cart order.
pub fn ticket_lines(cart: &[CartLine]) -> Vec<TicketLine> {
    cart.iter().map(TicketLine::from).collect()
}

/// Store one pending ticket for `order_id` in `preparation_cuisine`.
pub async fn send_to_kitchen<B: Backend + ?Sized>(
    backend: &B,
    order_id: &str,
    table_number: Option<i64>,
    lines: &[TicketLine],
) -> Result<KitchenTicket, PosError> {
    if lines.is_empty() {
        return Err(PosError::validation("Aucun article à envoyer en cuisine"));
    }

    let row = json!({
        "transaction_id": order_id,
        "table_numero": table_number,
        "items": lines,
        "statut": TicketStatus::Pending.as_str(),
        "creee_a": Utc::now().to_rfc3339(),
    });
    let stored = backend.insert(Table::KitchenTickets, row).await?;
    let ticket = KitchenTicket::from_row(&stored)?;
    info!(
        ticket_id = %ticket.ticket_id,
        order_id,
        table = ?table_number,
        lines = ticket.lines.len(),
        "kitchen ticket sent"
    );
    Ok(ticket)
}

/// Tickets not yet ready, oldest first.
pub async fn active_tickets<B: Backend + ?Sized>(
    backend: &B,
) -> Result<Vec<KitchenTicket>, BackendError> {
    let rows = backend
        .select(
            Table::KitchenTickets,
            &Query::new()
                .neq("statut", TicketStatus::Ready.as_str())
                .order("creee_a", true),
        )
        .await?;

    let mut tickets: Vec<KitchenTicket> = rows
        .iter()
        .filter_map(|row| match KitchenTicket::from_row(row) {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                warn!(error = %e, "skipping unreadable kitchen ticket");
                None
            }
        })
        .collect();
    // Same-instant tickets keep insertion order.
    tickets.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| id_rank(&a.ticket_id).cmp(&id_rank(&b.ticket_id)))
    });
    Ok(tickets)
}

fn id_rank(id: &str) -> (usize, &str) {
    (id.len(), id)
}

/// Move a ticket one step forward (pending → in progress → ready).
///
/// The write only matches while the row still holds the status the caller
/// saw, so two screens advancing the same ticket cannot skip or repeat a step.
pub async fn advance<B: Backend + ?Sized>(
    backend: &B,
    ticket: &KitchenTicket,
) -> Result<KitchenTicket, PosError> {
    let next = ticket
        .status
        .next()
        .ok_or_else(|| PosError::validation("Ce ticket est déjà prêt"))?;

    let changed = backend
        .update(
            Table::KitchenTickets,
            &Query::by_id(&ticket.ticket_id).eq("statut", ticket.status.as_str()),
            json!({ "statut": next.as_str() }),
        )
        .await?;
    if changed == 0 {
        warn!(ticket_id = %ticket.ticket_id, "ticket changed since it was read");
        return Err(PosError::validation(
            "Ce ticket a été modifié entre-temps, actualisez la liste",
        ));
    }

    info!(
        ticket_id = %ticket.ticket_id,
        from = ticket.status.as_str(),
        to = next.as_str(),
        "kitchen ticket advanced"
    );
    Ok(KitchenTicket {
        status: next,
        ..ticket.clone()
    })
}

/// Fetch one ticket by id.
pub async fn find_ticket<B: Backend + ?Sized>(
    backend: &B,
    ticket_id: &str,
) -> Result<KitchenTicket, BackendError> {
    let rows = backend
        .select(Table::KitchenTickets, &Query::by_id(ticket_id).limit(1))
        .await?;
    let row = rows
        .first()
        .ok_or_else(|| BackendError::NotFound(format!("ticket {ticket_id}")))?;
    KitchenTicket::from_row(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::backend::{GuardedBackend, SqliteBackend};
    use crate::types::normalize_ticket_lines;
    use std::sync::Arc;

    fn lines() -> Vec<TicketLine> {
        vec![
            TicketLine { name: "Garba".into(), quantity: 2 },
            TicketLine { name: "Alloco".into(), quantity: 1 },
        ]
    }

    #[tokio::test]
    async fn test_send_to_kitchen_stores_pending_ticket() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let ticket = send_to_kitchen(&b, "42", Some(3), &lines())
            .await
            .expect("send");
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(ticket.order_id, "42");
        assert_eq!(ticket.table_number, Some(3));

        let rows = b
            .select(Table::KitchenTickets, &Query::new())
            .await
            .expect("select");
        assert_eq!(rows[0]["statut"], json!("en_attente"));
        assert_eq!(rows[0]["items"][0], json!({ "nom": "Garba", "quantite": 2 }));
    }

    #[tokio::test]
    async fn test_send_to_kitchen_rejects_empty_ticket() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        assert!(send_to_kitchen(&b, "1", None, &[]).await.is_err());
    }

    #[test]
    fn test_ticket_lines_accept_both_conventions() {
        let english = json!([{ "name": "Garba", "quantity": 2 }]);
        let french = json!([{ "nom": "Garba", "quantite": 2 }]);
        assert_eq!(normalize_ticket_lines(&english), normalize_ticket_lines(&french));

        let cart = vec![CartLine::new("1", "Garba", 1500.0, 2)];
        assert_eq!(ticket_lines(&cart), normalize_ticket_lines(&french));
    }

    #[tokio::test]
    async fn test_advance_moves_forward_only() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let ticket = send_to_kitchen(&b, "7", None, &lines()).await.expect("send");

        let ticket = advance(&b, &ticket).await.expect("to in progress");
        assert_eq!(ticket.status, TicketStatus::InProgress);
        let ticket = advance(&b, &ticket).await.expect("to ready");
        assert_eq!(ticket.status, TicketStatus::Ready);
        assert!(advance(&b, &ticket).await.is_err());

        let stored = find_ticket(&b, &ticket.ticket_id).await.expect("find");
        assert_eq!(stored.status, TicketStatus::Ready);
    }

    #[tokio::test]
    async fn test_stale_advance_is_rejected() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let ticket = send_to_kitchen(&b, "7", None, &lines()).await.expect("send");
        advance(&b, &ticket).await.expect("first screen");
        // Second screen still holds the pending copy.
        assert!(advance(&b, &ticket).await.is_err());
        let stored = find_ticket(&b, &ticket.ticket_id).await.expect("find");
        assert_eq!(stored.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn test_active_tickets_fifo_without_ready() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let first = send_to_kitchen(&b, "1", None, &lines()).await.expect("first");
        let second = send_to_kitchen(&b, "2", None, &lines()).await.expect("second");
        let third = send_to_kitchen(&b, "3", None, &lines()).await.expect("third");
        let third = advance(&b, &third).await.expect("advance");
        advance(&b, &third).await.expect("ready");

        let active = active_tickets(&b).await.expect("active");
        let ids: Vec<&str> = active.iter().map(|t| t.ticket_id.as_str()).collect();
        assert_eq!(ids, vec![first.ticket_id.as_str(), second.ticket_id.as_str()]);
    }

    #[tokio::test]
    async fn test_guarded_backend_lets_floor_staff_send_tickets() {
        let inner = Arc::new(SqliteBackend::open_in_memory().expect("backend"));
        let guarded = GuardedBackend::new(inner, Role::Waiter);
        let ticket = send_to_kitchen(&guarded, "9", Some(1), &lines())
            .await
            .expect("waiter can send");
        advance(&guarded, &ticket).await.expect("waiter can advance");
    }
}
