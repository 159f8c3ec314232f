//! Cart reducer.
//!
//! `reduce` is total: every action on every cart yields a cart, and no line
//! ever sits at quantity zero. Adding an item already in the cart (same
//! catalog id) grows that line in place instead of appending a second one.

use serde::{Deserialize, Serialize};

use crate::types::CartLine;

/// Service charge applied on the orders screen.
pub const DEFAULT_SERVICE_RATE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub enum CartAction {
    Add(CartLine),
    Remove { line_id: String },
    /// Quantities at or below zero remove the line.
    UpdateQuantity { line_id: String, quantity: i64 },
    Clear,
}

pub fn reduce(mut lines: Vec<CartLine>, action: CartAction) -> Vec<CartLine> {
    match action {
        CartAction::Add(mut line) => {
            // An add without a quantity counts as one unit.
            let added = line.quantity.max(1);
            match lines
                .iter_mut()
                .find(|l| l.catalog_item_id == line.catalog_item_id)
            {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(added);
                }
                None => {
                    line.quantity = added;
                    lines.push(line);
                }
            }
            lines
        }
        CartAction::Remove { line_id } => {
            lines.retain(|l| l.line_id != line_id);
            lines
        }
        CartAction::UpdateQuantity { line_id, quantity } => {
            if quantity <= 0 {
                lines.retain(|l| l.line_id != line_id);
                return lines;
            }
            let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
            if let Some(line) = lines.iter_mut().find(|l| l.line_id == line_id) {
                line.quantity = quantity;
            }
            lines
        }
        CartAction::Clear => Vec::new(),
    }
}

/// The +/- buttons: `line.quantity + delta`, removing the line at zero.
pub fn step_quantity(lines: Vec<CartLine>, line_id: &str, delta: i64) -> Vec<CartLine> {
    let current = match lines.iter().find(|l| l.line_id == line_id) {
        Some(line) => i64::from(line.quantity),
        None => return lines,
    };
    reduce(
        lines,
        CartAction::UpdateQuantity {
            line_id: line_id.to_string(),
            quantity: current.saturating_add(delta),
        },
    )
}

pub fn subtotal(lines: &[CartLine]) -> f64 {
    lines.iter().map(CartLine::line_total).sum()
}

pub fn service_charge(subtotal: f64, rate: f64) -> f64 {
    subtotal * rate
}

pub fn item_count(lines: &[CartLine]) -> u32 {
    lines.iter().map(|l| l.quantity).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub subtotal: f64,
    pub service_charge: f64,
    pub total: f64,
}

impl CartTotals {
    pub fn compute(lines: &[CartLine], service_rate: f64) -> Self {
        let subtotal = subtotal(lines);
        let service_charge = service_charge(subtotal, service_rate);
        Self {
            subtotal,
            service_charge,
            total: subtotal + service_charge,
        }
    }

    /// Register sales carry no service charge.
    pub fn without_service(lines: &[CartLine]) -> Self {
        Self::compute(lines, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(item: &str, name: &str, price: f64, quantity: u32) -> CartLine {
        CartLine::new(item, name, price, quantity)
    }

    #[test]
    fn test_add_merges_same_catalog_item() {
        let cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 2)));
        let cart = reduce(cart, CartAction::Add(line("2", "Alloco", 1000.0, 1)));
        let cart = reduce(cart, CartAction::Add(line("1", "Garba", 1500.0, 3)));

        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0].catalog_item_id, "1");
        assert_eq!(cart[0].quantity, 5);
        assert_eq!(cart[1].catalog_item_id, "2");
    }

    #[test]
    fn test_add_with_zero_quantity_counts_as_one() {
        let cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 0)));
        assert_eq!(cart[0].quantity, 1);
        let cart = reduce(cart, CartAction::Add(line("1", "Garba", 1500.0, 0)));
        assert_eq!(cart[0].quantity, 2);
    }

    #[test]
    fn test_update_to_zero_equals_remove() {
        let cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 2)));
        let cart = reduce(cart, CartAction::Add(line("2", "Alloco", 1000.0, 1)));
        let id = cart[0].line_id.clone();

        let updated = reduce(
            cart.clone(),
            CartAction::UpdateQuantity { line_id: id.clone(), quantity: 0 },
        );
        let removed = reduce(cart, CartAction::Remove { line_id: id });
        assert_eq!(updated, removed);
        assert_eq!(updated.len(), 1);
    }

    #[test]
    fn test_negative_quantities_empty_the_cart() {
        let mut cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 2)));
        cart = reduce(cart, CartAction::Add(line("2", "Alloco", 1000.0, 1)));
        let ids: Vec<String> = cart.iter().map(|l| l.line_id.clone()).collect();
        for id in ids {
            cart = reduce(cart, CartAction::UpdateQuantity { line_id: id, quantity: -3 });
        }
        assert!(cart.is_empty());
    }

    #[test]
    fn test_update_keeps_position_and_unknown_ids_are_noops() {
        let cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 1)));
        let cart = reduce(cart, CartAction::Add(line("2", "Alloco", 1000.0, 1)));
        let first = cart[0].line_id.clone();

        let cart = reduce(cart, CartAction::UpdateQuantity { line_id: first, quantity: 4 });
        assert_eq!(cart[0].quantity, 4);
        assert_eq!(cart[0].catalog_item_id, "1");

        let same = reduce(cart.clone(), CartAction::Remove { line_id: "nope".into() });
        assert_eq!(same, cart);
        let same = reduce(
            cart.clone(),
            CartAction::UpdateQuantity { line_id: "nope".into(), quantity: 9 },
        );
        assert_eq!(same, cart);
        assert!(reduce(cart, CartAction::Clear).is_empty());
    }

    #[test]
    fn test_step_quantity() {
        let cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 1)));
        let id = cart[0].line_id.clone();
        let cart = step_quantity(cart, &id, 1);
        assert_eq!(cart[0].quantity, 2);
        let cart = step_quantity(cart, &id, -2);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_step_quantity_extreme_deltas_saturate() {
        let cart = reduce(Vec::new(), CartAction::Add(line("1", "Garba", 1500.0, 3)));
        let id = cart[0].line_id.clone();
        let cart = step_quantity(cart, &id, i64::MAX);
        assert_eq!(cart[0].quantity, u32::MAX);
        assert!(step_quantity(cart, &id, i64::MIN).is_empty());
    }

    #[test]
    fn test_poulet_braise_totals_with_service() {
        let cart = reduce(
            Vec::new(),
            CartAction::Add(line("10", "Poulet Braisé", 5000.0, 2)),
        );
        let totals = CartTotals::compute(&cart, DEFAULT_SERVICE_RATE);
        assert_eq!(totals.subtotal, 10000.0);
        assert_eq!(totals.service_charge, 500.0);
        assert_eq!(totals.total, 10500.0);
        assert_eq!(item_count(&cart), 2);
        assert_eq!(CartTotals::without_service(&cart).total, 10000.0);
    }
}
