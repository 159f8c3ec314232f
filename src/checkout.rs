//! Sale finalization: the register, the customer checkout and the orders
//! screen, plus the receipts they produce.

use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::app_state::{AppAction, Store};
use crate::backend::{Backend, Table};
use crate::cart::CartTotals;
use crate::config::RestaurantInfo;
use crate::error::{BackendError, PosError};
use crate::formatting::{format_date_time, format_price};
use crate::kitchen::{send_to_kitchen, ticket_lines};
use crate::stock::{deduct_stock_for_order, ReconciliationReport};
use crate::types::{CartLine, Customer, KitchenTicket, Order, OrderStatus, PaymentMethod};
use crate::validation::{self, LOCAL_PHONE_DIGITS};
use crate::value_id;

/// Country code prepended to local numbers in WhatsApp links.
pub const WHATSAPP_COUNTRY_CODE: &str = "225";

const RULE_SHORT: &str = "--------------------------";
const RULE_LONG: &str = "------------------------------------------";

// ---------------------------------------------------------------------------
// Register sale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleOutcome {
    pub order: Order,
    pub stock: ReconciliationReport,
    pub kitchen_ticket: Option<KitchenTicket>,
    /// Set when the ticket could not be stored; the sale itself stands.
    pub kitchen_error: Option<String>,
    pub receipt: String,
}

fn transaction_items(cart: &[CartLine]) -> serde_json::Value {
    cart.iter()
        .map(|line| {
            json!({
                "nom": line.display_name,
                "quantite": line.quantity,
                "prix_unitaire": line.unit_price,
            })
        })
        .collect()
}

/// Record the cart as a paid sale.
///
/// Once the `transactions` row exists, stock reconciliation and the kitchen
/// ticket run side by side; a failure in either is logged and reported in
/// the outcome without undoing the sale. The order lands in the session
/// history and the cart is cleared.
pub async fn finalize_sale<B: Backend + ?Sized>(
    backend: &B,
    store: &Store,
    info: &RestaurantInfo,
    cashier: &str,
    payment_method: &str,
    table_number: Option<i64>,
) -> Result<SaleOutcome, PosError> {
    let cashier = cashier.trim();
    if cashier.is_empty() {
        return Err(PosError::validation("Caissier requis"));
    }
    let cart = store.cart();
    let totals = CartTotals::without_service(&cart);
    let method = validation::validate_order(&cart, totals.total, payment_method)?;

    let paid_at = Utc::now();
    let stored = backend
        .insert(
            Table::Transactions,
            json!({
                "montant_total": totals.total,
                "sous_total": totals.subtotal,
                "mode_paiement": method.as_str(),
                "items": transaction_items(&cart),
                "caissier": cashier,
                "table_numero": table_number,
                "creee_a": paid_at.to_rfc3339(),
                "payee_a": paid_at.to_rfc3339(),
            }),
        )
        .await?;
    let transaction_id = value_id(&stored, &["id"])
        .ok_or_else(|| BackendError::Decode("transaction row without id".into()))?;
    info!(
        transaction_id = %transaction_id,
        total = totals.total,
        payment = %method,
        cashier,
        "sale recorded"
    );

    let lines = ticket_lines(&cart);
    let (stock, kitchen) = tokio::join!(
        deduct_stock_for_order(backend, &cart),
        send_to_kitchen(backend, &transaction_id, table_number, &lines),
    );
    let (kitchen_ticket, kitchen_error) = match kitchen {
        Ok(ticket) => (Some(ticket), None),
        Err(e) => {
            warn!(transaction_id = %transaction_id, error = %e, "kitchen ticket not sent");
            (None, Some(e.to_string()))
        }
    };

    let mut order = Order::new(
        transaction_id,
        cart,
        totals.total,
        Some(method),
        OrderStatus::Pending,
    );
    order.created_at = paid_at;
    order
        .transition(OrderStatus::Paid)
        .map_err(PosError::validation)?;
    let receipt = register_receipt(info, &order);

    store.dispatch(AppAction::AddOrder(order.clone()));
    store.dispatch(AppAction::ClearCart);

    Ok(SaleOutcome {
        order,
        stock,
        kitchen_ticket,
        kitchen_error,
        receipt,
    })
}

/// WhatsApp text receipt for a register sale.
pub fn register_receipt(info: &RestaurantInfo, order: &Order) -> String {
    let short_id: String = {
        let chars: Vec<char> = order.order_id.chars().collect();
        let start = chars.len().saturating_sub(6);
        chars[start..].iter().collect::<String>().to_uppercase()
    };
    let payment = order
        .payment_method
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_default();

    let mut msg = format!("*🏔️ {} 🍴*\n_{}_\n", info.name, info.city());
    msg.push_str(RULE_SHORT);
    msg.push('\n');
    msg.push_str(&format!("*REÇU #{short_id}*\n"));
    msg.push_str(&format!("📅 {}\n", format_date_time(&order.created_at)));
    msg.push_str(&format!("💳 {payment}\n"));
    msg.push_str(RULE_SHORT);
    msg.push_str("\n\n");
    for line in &order.lines {
        msg.push_str(&receipt_line(line));
        msg.push('\n');
    }
    msg.push_str(&format!("\n*TOTAL : {}*\n", format_price(order.total)));
    msg.push_str(RULE_SHORT);
    msg.push_str("\nMerci de votre confiance !");
    msg
}

fn receipt_line(line: &CartLine) -> String {
    format!(
        "• {}x {} : {}",
        line.quantity,
        line.display_name,
        format_price(line.line_total())
    )
}

// ---------------------------------------------------------------------------
// Customer checkout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerOrderOutcome {
    pub customer: Customer,
    pub order_id: String,
    pub total: f64,
    pub receipt: String,
    pub whatsapp_url: String,
}

/// Register the customer (keyed on phone), record the order in `commandes`
/// and clear the cart. The returned link opens WhatsApp with the receipt.
pub async fn register_customer_order<B: Backend + ?Sized>(
    backend: &B,
    store: &Store,
    info: &RestaurantInfo,
    customer_name: &str,
    phone: &str,
    payment_method: Option<&str>,
) -> Result<CustomerOrderOutcome, PosError> {
    let customer_name = customer_name.trim();
    let phone = phone.trim();
    if customer_name.is_empty() || phone.is_empty() {
        return Err(PosError::validation(
            "Veuillez remplir le nom et le numéro WhatsApp du client.",
        ));
    }
    if !validation::is_local_phone(phone) {
        return Err(PosError::validation(format!(
            "Le numéro doit comporter {LOCAL_PHONE_DIGITS} chiffres."
        )));
    }
    let cart = store.cart();
    if cart.is_empty() {
        return Err(PosError::validation(
            "La commande doit contenir au moins un article",
        ));
    }
    let method = match payment_method {
        Some(raw) => Some(
            PaymentMethod::parse(raw)
                .ok_or_else(|| PosError::validation("Méthode de paiement invalide"))?,
        ),
        None => None,
    };
    let total = CartTotals::without_service(&cart).total;

    let stored = backend
        .upsert(
            Table::Customers,
            json!({
                "nom": customer_name,
                "telephone": phone,
                "derniere_visite": Utc::now().to_rfc3339(),
            }),
            "telephone",
        )
        .await?;
    let customer = Customer::from_row(&stored)?;

    let order_row = backend
        .insert(
            Table::CustomerOrders,
            json!({
                "client_id": customer.id,
                "total": total,
                "articles": cart,
                "statut": "complete",
                "payment_method": method.map(|m| m.as_str()),
            }),
        )
        .await?;
    let order_id = value_id(&order_row, &["id"])
        .ok_or_else(|| BackendError::Decode("commande row without id".into()))?;
    info!(order_id = %order_id, customer_id = %customer.id, total, "customer order recorded");

    let receipt = receipt_message(info, customer_name, &cart, total);
    let whatsapp_url = whatsapp_url(phone, &receipt)?;
    store.dispatch(AppAction::ClearCart);

    Ok(CustomerOrderOutcome {
        customer,
        order_id,
        total,
        receipt,
        whatsapp_url,
    })
}

/// Thank-you receipt sent to a registered customer.
pub fn receipt_message(
    info: &RestaurantInfo,
    customer_name: &str,
    lines: &[CartLine],
    total: f64,
) -> String {
    let body: Vec<String> = lines.iter().map(receipt_line).collect();
    format!(
        "*🏔️ {} 🍴*\n\nMerci pour votre visite {customer_name} !\n{RULE_LONG}\n{}\n{RULE_LONG}\n*TOTAL : {}*\n\nÀ très bientôt ! ✨",
        info.name,
        body.join("\n"),
        format_price(total)
    )
}

/// `whatsapp://send` link for a local 10-digit number, text percent-encoded.
pub fn whatsapp_url(local_phone: &str, text: &str) -> Result<String, PosError> {
    let digits: String = local_phone.chars().filter(|c| !c.is_whitespace()).collect();
    if !validation::is_local_phone(&digits) {
        return Err(PosError::validation(format!(
            "Le numéro doit comporter {LOCAL_PHONE_DIGITS} chiffres."
        )));
    }
    let phone = format!("{WHATSAPP_COUNTRY_CODE}{digits}");
    let url = Url::parse_with_params("whatsapp://send", &[("phone", phone.as_str()), ("text", text)])
        .map_err(|e| PosError::validation(format!("Lien WhatsApp invalide: {e}")))?;
    // Form encoding writes spaces as '+' and a literal '+' as %2B.
    Ok(url.as_str().replace('+', "%20"))
}

// ---------------------------------------------------------------------------
// Orders screen
// ---------------------------------------------------------------------------

/// Turn the cart into a pending order with the service charge applied and
/// add it to the session history. Nothing is written to the backend.
pub fn submit_to_kitchen_order(store: &Store, service_rate: f64) -> Result<Order, PosError> {
    let cart = store.cart();
    if cart.is_empty() {
        return Err(PosError::validation("Le panier est vide"));
    }
    for line in &cart {
        validation::validate_cart_line(line)?;
    }
    let totals = CartTotals::compute(&cart, service_rate);
    let order_id = Utc::now().timestamp_millis().to_string();
    let order = Order::new(order_id, cart, totals.total, None, OrderStatus::Pending);
    info!(order_id = %order.order_id, total = totals.total, "order queued");

    store.dispatch(AppAction::AddOrder(order.clone()));
    store.dispatch(AppAction::ClearCart);
    Ok(order)
}

/// Confirmation text shown before an order is queued.
pub fn confirmation_prompt(total: f64) -> String {
    format!(
        "Envoyer la commande en cuisine pour un total de {} ?",
        format_price(total)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Query, SqliteBackend};
    use crate::cart::DEFAULT_SERVICE_RATE;
    use crate::types::TicketStatus;
    use chrono::TimeZone;

    fn info() -> RestaurantInfo {
        RestaurantInfo::default()
    }

    fn store_with_cart(lines: &[(&str, &str, f64, u32)]) -> Store {
        let store = Store::new();
        for (id, name, price, qty) in lines {
            store.dispatch(AppAction::AddToCart(CartLine::new(*id, *name, *price, *qty)));
        }
        store
    }

    #[tokio::test]
    async fn test_finalize_sale_records_everything() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        b.insert(Table::Stock, json!({ "nom": "Bissap", "quantite": 10 }))
            .await
            .expect("seed");
        let store = store_with_cart(&[("1", "Garba", 1500.0, 2), ("2", "Bissap", 500.0, 3)]);

        let outcome = finalize_sale(&b, &store, &info(), "Awa", "cash", Some(4))
            .await
            .expect("sale");

        assert_eq!(outcome.order.total, 4500.0);
        assert_eq!(outcome.order.status, OrderStatus::Paid);
        assert!(outcome.kitchen_error.is_none());
        assert_eq!(
            outcome.kitchen_ticket.as_ref().map(|t| t.status),
            Some(TicketStatus::Pending)
        );
        assert_eq!(outcome.stock.skipped, vec!["Garba".to_string()]);
        assert_eq!(outcome.stock.applied[0].new_quantity, 7.0);

        let tx = b.select(Table::Transactions, &Query::new()).await.expect("tx");
        assert_eq!(tx[0]["mode_paiement"], json!("especes"));
        assert_eq!(tx[0]["items"][0], json!({ "nom": "Garba", "quantite": 2, "prix_unitaire": 1500.0 }));
        assert_eq!(tx[0]["table_numero"], json!(4));

        let state = store.snapshot();
        assert!(state.cart.is_empty());
        assert_eq!(state.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_sale_rejects_empty_cart_and_unknown_payment() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let store = Store::new();
        assert!(finalize_sale(&b, &store, &info(), "Awa", "cash", None).await.is_err());

        let store = store_with_cart(&[("1", "Garba", 1500.0, 1)]);
        let err = finalize_sale(&b, &store, &info(), "Awa", "bitcoin", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Méthode de paiement invalide");
        // Nothing written, cart kept.
        assert_eq!(b.count(Table::Transactions, &Query::new()).await.expect("count"), 0);
        assert_eq!(store.cart().len(), 1);
    }

    #[test]
    fn test_register_receipt_layout() {
        let mut order = Order::new(
            "1700000000123",
            vec![CartLine::new("10", "Poulet Braisé", 5000.0, 2)],
            10000.0,
            Some(PaymentMethod::Wave),
            OrderStatus::Paid,
        );
        order.created_at = Utc.with_ymd_and_hms(2025, 3, 1, 14, 5, 0).unwrap();
        let receipt = register_receipt(&info(), &order);

        assert!(receipt.starts_with("*🏔️ O'PIED DU MONT 🍴*\n_Korhogo_\n"));
        assert!(receipt.contains("*REÇU #000123*\n"));
        assert!(receipt.contains("📅 1 mars 2025 à 14:05\n"));
        assert!(receipt.contains("💳 WAVE\n"));
        assert!(receipt.contains("• 2x Poulet Braisé : 10 000 FCFA\n"));
        assert!(receipt.contains("\n*TOTAL : 10 000 FCFA*\n"));
        assert!(receipt.ends_with("Merci de votre confiance !"));
    }

    #[test]
    fn test_customer_receipt_and_whatsapp_link() {
        let lines = vec![CartLine::new("1", "Garba", 1500.0, 2)];
        let msg = receipt_message(&info(), "M. Kouassi", &lines, 3000.0);
        assert!(msg.contains("Merci pour votre visite M. Kouassi !\n"));
        assert!(msg.contains("• 2x Garba : 3 000 FCFA\n"));
        assert!(msg.ends_with("*TOTAL : 3 000 FCFA*\n\nÀ très bientôt ! ✨"));

        let url = whatsapp_url("0707070707", "A + B & C").expect("url");
        assert!(url.starts_with("whatsapp://send?phone=2250707070707&text="));
        assert!(url.ends_with("A%20%2B%20B%20%26%20C"));
        assert!(whatsapp_url("07070707", "x").is_err());
    }

    #[tokio::test]
    async fn test_register_customer_order_upserts_on_phone() {
        let b = SqliteBackend::open_in_memory().expect("backend");

        let store = store_with_cart(&[("1", "Garba", 1500.0, 1)]);
        let first = register_customer_order(&b, &store, &info(), "Kouassi", "0707070707", None)
            .await
            .expect("first order");
        assert!(store.cart().is_empty());

        let store = store_with_cart(&[("2", "Alloco", 1000.0, 2)]);
        let second = register_customer_order(&b, &store, &info(), "M. Kouassi", "0707070707", Some("wave"))
            .await
            .expect("second order");

        assert_eq!(first.customer.id, second.customer.id);
        assert_eq!(second.customer.name, "M. Kouassi");
        assert_eq!(b.count(Table::Customers, &Query::new()).await.expect("count"), 1);
        let orders = b
            .select(Table::CustomerOrders, &Query::new().order("id", true))
            .await
            .expect("orders");
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1]["statut"], json!("complete"));
        assert_eq!(orders[1]["payment_method"], json!("wave"));
        assert_eq!(orders[1]["total"], json!(2000.0));
    }

    #[tokio::test]
    async fn test_register_customer_order_validation() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let store = store_with_cart(&[("1", "Garba", 1500.0, 1)]);

        let err = register_customer_order(&b, &store, &info(), "", "0707070707", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("remplir le nom"));
        let err = register_customer_order(&b, &store, &info(), "Awa", "070707", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Le numéro doit comporter 10 chiffres.");
        assert_eq!(store.cart().len(), 1);
    }

    #[test]
    fn test_submit_to_kitchen_order_applies_service() {
        let store = store_with_cart(&[("10", "Poulet Braisé", 5000.0, 2)]);
        let order = submit_to_kitchen_order(&store, DEFAULT_SERVICE_RATE).expect("order");
        assert_eq!(order.total, 10500.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(store.cart().is_empty());
        assert_eq!(store.snapshot().orders[0].order_id, order.order_id);
        assert!(submit_to_kitchen_order(&store, DEFAULT_SERVICE_RATE).is_err());
        assert_eq!(confirmation_prompt(10500.0), "Envoyer la commande en cuisine pour un total de 10 500 FCFA ?");
    }
}
