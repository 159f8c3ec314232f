//! Canonical domain types and the row normalization boundary.
//!
//! Rows fetched from the backend are converted here, once, into the types
//! below. Both column conventions seen in the data (`nom`/`name`,
//! `quantite`/`quantity`, `prix`/`price`, `actif`/`est_actif`, ...) are
//! accepted; nothing past this module reads raw rows.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::Role;
use crate::error::BackendError;
use crate::{value_bool, value_f64, value_i64, value_id, value_str};

/// Default alert threshold when a stock row has none (or zero).
pub const DEFAULT_ALERT_THRESHOLD: f64 = 5.0;
pub const DEFAULT_STOCK_UNIT: &str = "pcs";
pub const DEFAULT_CATEGORY_COLOR: &str = "#EAB308";
pub const DEFAULT_CATEGORY_ICON: &str = "🍴";
/// Category label for menu items whose category cannot be resolved.
pub const FALLBACK_CATEGORY: &str = "Autre";

fn missing(entity: &str, field: &str) -> BackendError {
    BackendError::Decode(format!("{entity} row missing {field}"))
}

/// Parse backend timestamps: RFC 3339, or naive `YYYY-MM-DD[T ]HH:MM:SS`
/// (treated as UTC) for `timestamp without time zone` columns.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Cart & orders
// ---------------------------------------------------------------------------

/// One orderable entry in the in-progress order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub line_id: String,
    pub catalog_item_id: String,
    pub display_name: String,
    pub unit_price: f64,
    pub quantity: u32,
}

impl CartLine {
    /// New line with a fresh line id.
    pub fn new(
        catalog_item_id: impl Into<String>,
        display_name: impl Into<String>,
        unit_price: f64,
        quantity: u32,
    ) -> Self {
        Self {
            line_id: Uuid::new_v4().to_string(),
            catalog_item_id: catalog_item_id.into(),
            display_name: display_name.into(),
            unit_price,
            quantity,
        }
    }

    /// Line for one unit of a menu item.
    pub fn for_menu_item(item: &MenuItem) -> Self {
        Self::new(item.id.clone(), item.name.clone(), item.price, 1)
    }

    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Check,
    Wave,
    OrangeMoney,
    Moov,
}

impl PaymentMethod {
    /// Value written to the `mode_paiement` / `payment_method` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "especes",
            PaymentMethod::Card => "carte",
            PaymentMethod::Check => "cheque",
            PaymentMethod::Wave => "wave",
            PaymentMethod::OrangeMoney => "orange_money",
            PaymentMethod::Moov => "moov",
        }
    }

    pub fn parse(raw: &str) -> Option<PaymentMethod> {
        match raw.trim().to_lowercase().as_str() {
            "cash" | "especes" | "espèces" => Some(PaymentMethod::Cash),
            "card" | "carte" => Some(PaymentMethod::Card),
            "check" | "cheque" | "chèque" => Some(PaymentMethod::Check),
            "wave" => Some(PaymentMethod::Wave),
            "orange" | "orange_money" | "orange-money" => Some(PaymentMethod::OrangeMoney),
            "moov" | "moov_money" => Some(PaymentMethod::Moov),
            _ => None,
        }
    }

    /// Daily report bucket. Cheques are not tracked in the report.
    pub fn report_bucket(&self) -> Option<&'static str> {
        match self {
            PaymentMethod::Cash => Some("especes"),
            PaymentMethod::Card => Some("carte"),
            PaymentMethod::Wave => Some("wave"),
            PaymentMethod::OrangeMoney => Some("orange"),
            PaymentMethod::Moov => Some("moov"),
            PaymentMethod::Check => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Paid,
    Cancelled,
}

impl OrderStatus {
    /// Allowed moves: pending → preparing → ready, pending → paid, and
    /// pending → cancelled.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Preparing)
                | (OrderStatus::Preparing, OrderStatus::Ready)
                | (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// A finalized cart. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub lines: Vec<CartLine>,
    pub total: f64,
    pub payment_method: Option<PaymentMethod>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        lines: Vec<CartLine>,
        total: f64,
        payment_method: Option<PaymentMethod>,
        status: OrderStatus,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            lines,
            total,
            payment_method,
            status,
            created_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, next: OrderStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "order {} cannot move from {} to {}",
                self.order_id,
                self.status.as_str(),
                next.as_str()
            ));
        }
        self.status = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stock & recipes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUnit {
    pub stock_id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub alert_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StockUnit {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        let stock_id = value_id(row, &["id", "stock_id", "stockId"]).ok_or(missing("stock", "id"))?;
        let name = value_str(row, &["nom", "name"]).ok_or(missing("stock", "nom"))?;
        let threshold = value_f64(row, &["seuil_alerte", "alertThreshold", "minQuantity"])
            .filter(|t| *t != 0.0)
            .unwrap_or(DEFAULT_ALERT_THRESHOLD);
        Ok(Self {
            stock_id,
            name,
            quantity: value_f64(row, &["quantite", "quantity"]).unwrap_or(0.0),
            unit: value_str(row, &["unite", "unit"]).unwrap_or_else(|| DEFAULT_STOCK_UNIT.into()),
            alert_threshold: threshold,
            category: value_str(row, &["categorie", "category"]),
            supplier: value_str(row, &["fournisseur", "supplier"]),
            updated_at: value_str(row, &["derniere_mise_a_jour", "lastUpdated"]),
        })
    }

    pub fn to_row(&self) -> Value {
        json!({
            "nom": self.name,
            "quantite": self.quantity,
            "unite": self.unit,
            "seuil_alerte": self.alert_threshold,
            "categorie": self.category,
            "fournisseur": self.supplier,
        })
    }
}

/// Stock consumed per unit sold of a menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeLink {
    pub catalog_item_id: String,
    pub stock_id: String,
    pub consumed_per_unit: f64,
}

impl RecipeLink {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        Ok(Self {
            catalog_item_id: value_id(row, &["menu_id", "catalogItemId"])
                .ok_or(missing("menu_recettes", "menu_id"))?,
            stock_id: value_id(row, &["stock_id", "stockId"])
                .ok_or(missing("menu_recettes", "stock_id"))?,
            consumed_per_unit: value_f64(row, &["quantite_consommee", "consumedPerUnit"])
                .ok_or(missing("menu_recettes", "quantite_consommee"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Kitchen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    #[serde(rename = "en_attente", alias = "pending")]
    Pending,
    #[serde(rename = "en_cours", alias = "in_progress")]
    InProgress,
    #[serde(rename = "pret", alias = "ready")]
    Ready,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "en_attente",
            TicketStatus::InProgress => "en_cours",
            TicketStatus::Ready => "pret",
        }
    }

    pub fn parse(raw: &str) -> Option<TicketStatus> {
        match raw.trim().to_lowercase().as_str() {
            "en_attente" | "pending" => Some(TicketStatus::Pending),
            "en_cours" | "in_progress" => Some(TicketStatus::InProgress),
            "pret" | "prêt" | "ready" => Some(TicketStatus::Ready),
            _ => None,
        }
    }

    /// Next status in the preparation lifecycle; `None` once ready.
    pub fn next(&self) -> Option<TicketStatus> {
        match self {
            TicketStatus::Pending => Some(TicketStatus::InProgress),
            TicketStatus::InProgress => Some(TicketStatus::Ready),
            TicketStatus::Ready => None,
        }
    }
}

/// `{nom, quantite}` on the wire; `{name, quantity}` accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketLine {
    #[serde(rename = "nom", alias = "name")]
    pub name: String,
    #[serde(rename = "quantite", alias = "quantity")]
    pub quantity: u32,
}

impl From<&CartLine> for TicketLine {
    fn from(line: &CartLine) -> Self {
        Self {
            name: line.display_name.clone(),
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenTicket {
    pub ticket_id: String,
    pub order_id: String,
    pub table_number: Option<i64>,
    pub lines: Vec<TicketLine>,
    pub status: TicketStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl KitchenTicket {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        let status_raw = value_str(row, &["statut", "status"]).ok_or(missing("ticket", "statut"))?;
        let status = TicketStatus::parse(&status_raw)
            .ok_or_else(|| BackendError::Decode(format!("unknown ticket status '{status_raw}'")))?;
        Ok(Self {
            ticket_id: value_id(row, &["id"]).ok_or(missing("ticket", "id"))?,
            order_id: value_id(row, &["transaction_id", "orderId"]).unwrap_or_default(),
            table_number: value_i64(row, &["table_numero", "tableNumber"]),
            lines: normalize_ticket_lines(row.get("items").unwrap_or(&Value::Null)),
            status,
            created_at: value_str(row, &["creee_a", "createdAt"])
                .as_deref()
                .and_then(parse_timestamp),
        })
    }
}

/// Normalize a ticket `items` payload. The payload may be a JSON array or a
/// string holding one; entries may use either naming convention, and entries
/// without a name are dropped.
pub fn normalize_ticket_lines(items: &Value) -> Vec<TicketLine> {
    let parsed;
    let items = match items {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
            &parsed
        }
        other => other,
    };
    items
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let name = value_str(item, &["nom", "name"])?;
                    let quantity = value_i64(item, &["quantite", "quantity"])
                        .unwrap_or(1)
                        .max(1);
                    Some(TicketLine {
                        name,
                        quantity: u32::try_from(quantity).unwrap_or(u32::MAX),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: String,
}

impl Category {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        Ok(Self {
            id: value_id(row, &["id"]).ok_or(missing("categories", "id"))?,
            name: value_str(row, &["nom", "name"]).ok_or(missing("categories", "nom"))?,
            color: value_str(row, &["couleur", "color"])
                .unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.into()),
            icon: value_str(row, &["icone", "icon"]).unwrap_or_else(|| DEFAULT_CATEGORY_ICON.into()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category_id: Option<String>,
    pub category: String,
    pub available: bool,
    pub image: Option<String>,
}

impl MenuItem {
    /// `categories` resolves `categorie_id` to a display name.
    pub fn from_row(row: &Value, categories: &[Category]) -> Result<Self, BackendError> {
        let category_id = value_id(row, &["categorie_id", "categoryId"]);
        let category = category_id
            .as_deref()
            .and_then(|cid| categories.iter().find(|c| c.id == cid))
            .map(|c| c.name.clone())
            .or_else(|| value_str(row, &["categorie", "category"]))
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string());
        Ok(Self {
            id: value_id(row, &["id"]).ok_or(missing("menu", "id"))?,
            name: value_str(row, &["nom", "name"]).ok_or(missing("menu", "nom"))?,
            description: value_str(row, &["description"]).unwrap_or_default(),
            price: value_f64(row, &["prix", "price"]).ok_or(missing("menu", "prix"))?,
            category_id,
            category,
            available: value_bool(row, &["actif", "available"]).unwrap_or(true),
            image: value_str(row, &["image"]),
        })
    }
}

// ---------------------------------------------------------------------------
// People
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
    pub active: bool,
    #[serde(skip_serializing)]
    pub pin: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub hired_at: Option<String>,
}

impl Employee {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        Ok(Self {
            id: value_id(row, &["id"]).ok_or(missing("employes", "id"))?,
            name: value_str(row, &["nom", "name"]).ok_or(missing("employes", "nom"))?,
            phone: value_str(row, &["telephone", "phone"]).unwrap_or_default(),
            role: Role::parse(&value_str(row, &["role"]).unwrap_or_default()),
            active: value_bool(row, &["actif", "est_actif"]).unwrap_or(true),
            pin: value_str(row, &["code_pin"]),
            password: value_str(row, &["password"]),
            hired_at: value_str(row, &["created_at", "hireDate"]),
        })
    }
}

/// The logged-in staff member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
}

impl From<&Employee> for User {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            phone: e.phone.clone(),
            role: e.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub last_visit: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        Ok(Self {
            id: value_id(row, &["id"]).ok_or(missing("clients", "id"))?,
            name: value_str(row, &["nom", "name"]).unwrap_or_default(),
            phone: value_str(row, &["telephone", "phone"]).ok_or(missing("clients", "telephone"))?,
            last_visit: value_str(row, &["derniere_visite"])
                .as_deref()
                .and_then(parse_timestamp),
        })
    }
}

/// A row of `commandes`, as read by the sales report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub total: f64,
    pub payment_method: Option<String>,
}

impl SalesRecord {
    pub fn from_row(row: &Value) -> Result<Self, BackendError> {
        Ok(Self {
            id: value_id(row, &["id"]).ok_or(missing("commandes", "id"))?,
            created_at: value_str(row, &["created_at", "creee_a"])
                .as_deref()
                .and_then(parse_timestamp)
                .ok_or(missing("commandes", "created_at"))?,
            total: value_f64(row, &["total", "montant_total"]).unwrap_or(0.0),
            payment_method: value_str(row, &["payment_method", "mode_paiement"]),
        })
    }
}
