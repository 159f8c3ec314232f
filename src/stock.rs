//! Stock levels, sale reconciliation and the stock board.
//!
//! A sold cart line consumes stock in one of two ways:
//!
//! - through its recipe links (`menu_recettes`): each linked stock unit is
//!   decremented by `consumed_per_unit * quantity`;
//! - failing any recipe, through a stock unit whose name equals the line's
//!   display name (drinks, desserts bought ready-made): decremented by the
//!   line quantity.
//!
//! Lines matching neither are not stock-tracked and are skipped. Every
//! decrement goes through [`Backend::adjust_stock`], so two registers selling
//! the same dish never overwrite each other's decrement.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{require, Permission, Role};
use crate::backend::{Backend, Query, Table};
use crate::error::{BackendError, PosError};
use crate::optimistic::Optimistic;
use crate::types::{CartLine, RecipeLink, StockUnit};

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StockLevel {
    Out,
    Critical,
    Available,
}

impl StockLevel {
    pub fn classify(quantity: f64, alert_threshold: f64) -> Self {
        if quantity <= 0.0 {
            StockLevel::Out
        } else if quantity <= alert_threshold {
            StockLevel::Critical
        } else {
            StockLevel::Available
        }
    }

    pub fn of(unit: &StockUnit) -> Self {
        Self::classify(unit.quantity, unit.alert_threshold)
    }

    pub fn label(&self) -> &'static str {
        match self {
            StockLevel::Out => "RUPTURE",
            StockLevel::Critical => "CRITIQUE",
            StockLevel::Available => "DISPONIBLE",
        }
    }
}

/// Units that are out or at/below their alert threshold, in input order.
pub fn alerts(units: &[StockUnit]) -> Vec<&StockUnit> {
    units
        .iter()
        .filter(|u| StockLevel::of(u) != StockLevel::Available)
        .collect()
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecrementSource {
    Recipe,
    NameMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decrement {
    pub line_id: String,
    pub stock_id: String,
    pub amount: f64,
    pub new_quantity: f64,
    pub source: DecrementSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineFailure {
    pub line_id: String,
    pub display_name: String,
    pub error: String,
}

/// Outcome of reconciling one order against stock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub applied: Vec<Decrement>,
    /// Display names of lines with neither recipe nor matching stock unit.
    pub skipped: Vec<String>,
    pub failures: Vec<LineFailure>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, line: &CartLine, error: &BackendError) {
        warn!(
            line_id = %line.line_id,
            item = %line.display_name,
            error = %error,
            "stock reconciliation failed for line"
        );
        self.failures.push(LineFailure {
            line_id: line.line_id.clone(),
            display_name: line.display_name.clone(),
            error: error.to_string(),
        });
    }
}

async fn decrement<B: Backend + ?Sized>(
    backend: &B,
    report: &mut ReconciliationReport,
    line: &CartLine,
    stock_id: &str,
    amount: f64,
    source: DecrementSource,
) {
    match backend.adjust_stock(stock_id, -amount).await {
        Ok(new_quantity) => {
            debug!(stock_id, amount, new_quantity, ?source, "stock decremented");
            report.applied.push(Decrement {
                line_id: line.line_id.clone(),
                stock_id: stock_id.to_string(),
                amount,
                new_quantity,
                source,
            });
        }
        Err(e) => report.fail(line, &e),
    }
}

/// Decrement stock for every line of a sold order, in cart order.
///
/// Never fails as a whole: a lookup or write error on one line is logged and
/// recorded, earlier decrements stand, and the remaining lines still run.
pub async fn deduct_stock_for_order<B: Backend + ?Sized>(
    backend: &B,
    lines: &[CartLine],
) -> ReconciliationReport {
    let mut report = ReconciliationReport::default();

    for line in lines {
        let quantity = f64::from(line.quantity);

        let recipe_rows = match backend
            .select(
                Table::RecipeLinks,
                &Query::new().eq("menu_id", line.catalog_item_id.as_str()),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                report.fail(line, &e);
                continue;
            }
        };
        let links: Vec<RecipeLink> = recipe_rows
            .iter()
            .filter_map(|row| match RecipeLink::from_row(row) {
                Ok(link) => Some(link),
                Err(e) => {
                    warn!(item = %line.display_name, error = %e, "ignoring malformed recipe link");
                    None
                }
            })
            .collect();

        if !links.is_empty() {
            for link in &links {
                let amount = link.consumed_per_unit * quantity;
                decrement(backend, &mut report, line, &link.stock_id, amount, DecrementSource::Recipe)
                    .await;
            }
            continue;
        }

        let matched = match backend
            .select(
                Table::Stock,
                &Query::new().eq("nom", line.display_name.as_str()).limit(1),
            )
            .await
        {
            Ok(rows) => rows.first().and_then(|row| StockUnit::from_row(row).ok()),
            Err(e) => {
                report.fail(line, &e);
                continue;
            }
        };

        match matched {
            Some(unit) => {
                decrement(
                    backend,
                    &mut report,
                    line,
                    &unit.stock_id,
                    quantity,
                    DecrementSource::NameMatch,
                )
                .await;
            }
            None => {
                debug!(item = %line.display_name, "no recipe or stock match, skipping");
                report.skipped.push(line.display_name.clone());
            }
        }
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        failures = report.failures.len(),
        "stock reconciliation complete"
    );
    report
}

// ---------------------------------------------------------------------------
// Stock board
// ---------------------------------------------------------------------------

/// The stock screen: the displayed list plus manual quantity edits, applied
/// optimistically.
#[derive(Debug, Clone)]
pub struct StockBoard {
    items: Optimistic<Vec<StockUnit>>,
}

impl Default for StockBoard {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StockBoard {
    pub fn new(items: Vec<StockUnit>) -> Self {
        Self {
            items: Optimistic::new(items),
        }
    }

    pub fn items(&self) -> &[StockUnit] {
        self.items.value()
    }

    /// Refetch every unit, ordered by name.
    pub async fn refresh<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<(), BackendError> {
        let rows = backend
            .select(Table::Stock, &Query::new().order("nom", true))
            .await?;
        let units = rows
            .iter()
            .map(StockUnit::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.items.reset(units);
        Ok(())
    }

    /// Case-insensitive substring match on the unit name.
    pub fn search(&self, query: &str) -> Vec<&StockUnit> {
        let needle = query.trim().to_lowercase();
        self.items()
            .iter()
            .filter(|u| u.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Set a unit's quantity by hand (clamped at zero). The list shows the
    /// new value at once and reverts if the backend write fails.
    pub async fn set_quantity<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        role: Role,
        stock_id: &str,
        quantity: f64,
    ) -> Result<f64, PosError> {
        require(role, Permission::EditStock)?;
        if !quantity.is_finite() {
            return Err(PosError::validation("Quantité invalide"));
        }
        let final_quantity = quantity.max(0.0);

        let mut updated = self.items().to_vec();
        let unit = updated
            .iter_mut()
            .find(|u| u.stock_id == stock_id)
            .ok_or_else(|| BackendError::NotFound(format!("stock {stock_id}")))?;
        unit.quantity = final_quantity;

        let write = async {
            let changed = backend
                .update(
                    Table::Stock,
                    &Query::by_id(stock_id),
                    json!({ "quantite": final_quantity }),
                )
                .await?;
            if changed == 0 {
                return Err(BackendError::NotFound(format!("stock {stock_id}")));
            }
            Ok(())
        };
        self.items.apply(updated, write).await?;
        info!(stock_id, quantity = final_quantity, role = %role, "stock quantity set");
        Ok(final_quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::value_f64;
    use serde_json::Value;

    async fn quantity_of(backend: &SqliteBackend, id: &str) -> f64 {
        let rows = backend
            .select(Table::Stock, &Query::by_id(id))
            .await
            .expect("select stock");
        value_f64(&rows[0], &["quantite"]).expect("quantite")
    }

    async fn seed(backend: &SqliteBackend, table: Table, row: Value) -> String {
        let stored = backend.insert(table, row).await.expect("seed row");
        stored["id"].to_string()
    }

    #[test]
    fn test_stock_levels() {
        assert_eq!(StockLevel::classify(0.0, 5.0), StockLevel::Out);
        assert_eq!(StockLevel::classify(-2.0, 5.0), StockLevel::Out);
        assert_eq!(StockLevel::classify(5.0, 5.0), StockLevel::Critical);
        assert_eq!(StockLevel::classify(5.5, 5.0), StockLevel::Available);
        assert_eq!(StockLevel::Critical.label(), "CRITIQUE");
    }

    #[tokio::test]
    async fn test_recipe_links_decrement_each_ingredient() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let dish = seed(&b, Table::Menu, json!({ "nom": "Garba", "prix": 1500 })).await;
        let a = seed(&b, Table::Stock, json!({ "nom": "Attiéké", "quantite": 20 })).await;
        let c = seed(&b, Table::Stock, json!({ "nom": "Thon", "quantite": 10 })).await;
        seed(&b, Table::RecipeLinks, json!({ "menu_id": dish, "stock_id": a, "quantite_consommee": 2 })).await;
        seed(&b, Table::RecipeLinks, json!({ "menu_id": dish, "stock_id": c, "quantite_consommee": 1 })).await;

        let lines = vec![CartLine::new(dish.clone(), "Garba", 1500.0, 3)];
        let report = deduct_stock_for_order(&b, &lines).await;

        assert!(report.is_clean());
        assert_eq!(report.applied.len(), 2);
        assert_eq!(quantity_of(&b, &a).await, 14.0);
        assert_eq!(quantity_of(&b, &c).await, 7.0);
    }

    #[tokio::test]
    async fn test_name_match_fallback() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let coca = seed(&b, Table::Stock, json!({ "nom": "Coca-Cola", "quantite": 24 })).await;

        let lines = vec![CartLine::new("99", "Coca-Cola", 500.0, 4)];
        let report = deduct_stock_for_order(&b, &lines).await;

        assert_eq!(report.applied[0].source, DecrementSource::NameMatch);
        assert_eq!(quantity_of(&b, &coca).await, 20.0);
    }

    #[tokio::test]
    async fn test_untracked_item_changes_nothing() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let riz = seed(&b, Table::Stock, json!({ "nom": "Riz", "quantite": 8 })).await;

        let lines = vec![CartLine::new("5", "Café", 300.0, 2)];
        let report = deduct_stock_for_order(&b, &lines).await;

        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, vec!["Café".to_string()]);
        assert_eq!(quantity_of(&b, &riz).await, 8.0);
    }

    #[tokio::test]
    async fn test_removed_ingredient_falls_back_to_name_match() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let dish = seed(&b, Table::Menu, json!({ "nom": "Foutou", "prix": 2000 })).await;
        let banane = seed(&b, Table::Stock, json!({ "nom": "Banane", "quantite": 10 })).await;
        let bissap = seed(&b, Table::Stock, json!({ "nom": "Bissap", "quantite": 10 })).await;
        seed(&b, Table::RecipeLinks, json!({ "menu_id": dish, "stock_id": banane, "quantite_consommee": 1 })).await;
        // Recipe links cascade with the stock row.
        b.delete(Table::Stock, &Query::by_id(&banane)).await.expect("delete");

        let lines = vec![
            CartLine::new(dish, "Foutou", 2000.0, 1),
            CartLine::new("77", "Bissap", 500.0, 2),
        ];
        let report = deduct_stock_for_order(&b, &lines).await;

        assert_eq!(report.skipped, vec!["Foutou".to_string()]);
        assert_eq!(quantity_of(&b, &bissap).await, 8.0);
    }

    #[tokio::test]
    async fn test_reconciliation_does_not_floor_at_zero() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let eau = seed(&b, Table::Stock, json!({ "nom": "Eau", "quantite": 1 })).await;
        deduct_stock_for_order(&b, &[CartLine::new("3", "Eau", 300.0, 3)]).await;
        assert_eq!(quantity_of(&b, &eau).await, -2.0);
    }

    #[tokio::test]
    async fn test_board_set_quantity_clamps_and_persists() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let id = seed(&b, Table::Stock, json!({ "nom": "Oignon", "quantite": 6 })).await;
        let mut board = StockBoard::default();
        board.refresh(&b).await.expect("refresh");

        let q = board
            .set_quantity(&b, Role::Chef, &id, -4.0)
            .await
            .expect("set quantity");
        assert_eq!(q, 0.0);
        assert_eq!(board.items()[0].quantity, 0.0);
        assert_eq!(quantity_of(&b, &id).await, 0.0);
    }

    #[tokio::test]
    async fn test_board_rejects_non_editing_roles() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let id = seed(&b, Table::Stock, json!({ "nom": "Oignon", "quantite": 6 })).await;
        let mut board = StockBoard::default();
        board.refresh(&b).await.expect("refresh");

        let err = board
            .set_quantity(&b, Role::Waiter, &id, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, PosError::Backend(BackendError::Forbidden(_))));
        assert_eq!(board.items()[0].quantity, 6.0);
    }

    #[tokio::test]
    async fn test_board_reverts_on_write_failure() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let id = seed(&b, Table::Stock, json!({ "nom": "Tomate", "quantite": 12 })).await;
        let mut board = StockBoard::default();
        board.refresh(&b).await.expect("refresh");
        // Row removed behind the board's back: the update matches nothing.
        b.delete(Table::Stock, &Query::by_id(&id)).await.expect("delete");

        let err = board.set_quantity(&b, Role::Admin, &id, 3.0).await.unwrap_err();
        assert!(matches!(err, PosError::Backend(BackendError::NotFound(_))));
        assert_eq!(board.items()[0].quantity, 12.0);
    }

    #[tokio::test]
    async fn test_board_search_and_alerts() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        seed(&b, Table::Stock, json!({ "nom": "Poulet", "quantite": 3 })).await;
        seed(&b, Table::Stock, json!({ "nom": "Poisson", "quantite": 40 })).await;
        seed(&b, Table::Stock, json!({ "nom": "Huile", "quantite": 0 })).await;
        let mut board = StockBoard::default();
        board.refresh(&b).await.expect("refresh");

        let names: Vec<&str> = board.search("POI").iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Poisson"]);
        let alert_names: Vec<&str> = alerts(board.items()).iter().map(|u| u.name.as_str()).collect();
        assert_eq!(alert_names, vec!["Huile", "Poulet"]);
    }
}
