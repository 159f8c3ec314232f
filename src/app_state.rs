//! Application state container.
//!
//! One [`Store`] is created by the composition root (the CLI, or whatever
//! embeds the library) and passed by reference to the operations that read
//! or change session state. State changes go through [`reduce`] only.

use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::cart::{self, CartAction};
use crate::types::{CartLine, Category, Employee, MenuItem, Order, StockUnit, User};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub user: Option<User>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub cart: Vec<CartLine>,
    /// Most recent first.
    pub orders: Vec<Order>,
    pub menu_items: Vec<MenuItem>,
    pub categories: Vec<Category>,
    pub stock_items: Vec<StockUnit>,
    pub employees: Vec<Employee>,
}

/// Sections replaced by a data refresh; `None` leaves a section untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataUpdate {
    pub categories: Option<Vec<Category>>,
    pub menu_items: Option<Vec<MenuItem>>,
    pub stock_items: Option<Vec<StockUnit>>,
    pub employees: Option<Vec<Employee>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppAction {
    SetUser(Option<User>),
    SetLoading(bool),
    SetError(Option<String>),
    AddToCart(CartLine),
    RemoveFromCart { line_id: String },
    UpdateCartItem { line_id: String, quantity: i64 },
    /// The +/- buttons of a cart line.
    StepCartItem { line_id: String, delta: i64 },
    ClearCart,
    SetData(DataUpdate),
    AddOrder(Order),
    Reset,
}

impl AppAction {
    fn name(&self) -> &'static str {
        match self {
            AppAction::SetUser(_) => "set_user",
            AppAction::SetLoading(_) => "set_loading",
            AppAction::SetError(_) => "set_error",
            AppAction::AddToCart(_) => "add_to_cart",
            AppAction::RemoveFromCart { .. } => "remove_from_cart",
            AppAction::UpdateCartItem { .. } => "update_cart_item",
            AppAction::StepCartItem { .. } => "step_cart_item",
            AppAction::ClearCart => "clear_cart",
            AppAction::SetData(_) => "set_data",
            AppAction::AddOrder(_) => "add_order",
            AppAction::Reset => "reset",
        }
    }
}

pub fn reduce(mut state: AppState, action: AppAction) -> AppState {
    match action {
        AppAction::SetUser(user) => {
            state.user = user;
            state.is_loading = false;
        }
        AppAction::SetLoading(loading) => state.is_loading = loading,
        AppAction::SetError(error) => {
            state.error = error;
            state.is_loading = false;
        }
        AppAction::AddToCart(line) => {
            state.cart = cart::reduce(std::mem::take(&mut state.cart), CartAction::Add(line));
        }
        AppAction::RemoveFromCart { line_id } => {
            state.cart = cart::reduce(
                std::mem::take(&mut state.cart),
                CartAction::Remove { line_id },
            );
        }
        AppAction::UpdateCartItem { line_id, quantity } => {
            state.cart = cart::reduce(
                std::mem::take(&mut state.cart),
                CartAction::UpdateQuantity { line_id, quantity },
            );
        }
        AppAction::StepCartItem { line_id, delta } => {
            state.cart = cart::step_quantity(std::mem::take(&mut state.cart), &line_id, delta);
        }
        AppAction::ClearCart => state.cart.clear(),
        AppAction::SetData(update) => {
            if let Some(categories) = update.categories {
                state.categories = categories;
            }
            if let Some(menu_items) = update.menu_items {
                state.menu_items = menu_items;
            }
            if let Some(stock_items) = update.stock_items {
                state.stock_items = stock_items;
            }
            if let Some(employees) = update.employees {
                state.employees = employees;
            }
            state.is_loading = false;
        }
        AppAction::AddOrder(order) => state.orders.insert(0, order),
        AppAction::Reset => return AppState::default(),
    }
    state
}

/// Owner of the session's [`AppState`].
#[derive(Debug, Default)]
pub struct Store {
    state: Mutex<AppState>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, action: AppAction) {
        let name = action.name();
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            // A panic in `read` poisons the lock without touching the state.
            Err(poisoned) => poisoned.into_inner(),
        };
        // Reduce a copy so a panicking reducer leaves the stored state as it was.
        let next = reduce(guard.clone(), action);
        *guard = next;
        debug!(action = name, cart_lines = guard.cart.len(), "state updated");
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> AppState {
        self.read(|s| s.clone())
    }

    /// Run `f` against the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        match self.state.lock() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }

    pub fn cart(&self) -> Vec<CartLine> {
        self.read(|s| s.cart.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.read(|s| s.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::types::OrderStatus;

    fn user() -> User {
        User {
            id: "1".into(),
            name: "Awa".into(),
            phone: "0707070707".into(),
            role: Role::Cashier,
        }
    }

    #[test]
    fn test_set_user_and_error_clear_loading() {
        let state = reduce(AppState::default(), AppAction::SetLoading(true));
        assert!(state.is_loading);
        let state = reduce(state, AppAction::SetUser(Some(user())));
        assert!(!state.is_loading);

        let state = reduce(state, AppAction::SetLoading(true));
        let state = reduce(state, AppAction::SetError(Some("réseau".into())));
        assert!(!state.is_loading);
        assert_eq!(state.error.as_deref(), Some("réseau"));
    }

    #[test]
    fn test_set_data_replaces_only_given_sections() {
        let cat = Category {
            id: "1".into(),
            name: "Grillades".into(),
            color: "#EAB308".into(),
            icon: "🍴".into(),
        };
        let state = reduce(
            AppState::default(),
            AppAction::SetData(DataUpdate {
                categories: Some(vec![cat.clone()]),
                ..DataUpdate::default()
            }),
        );
        let state = reduce(
            state,
            AppAction::SetData(DataUpdate {
                stock_items: Some(Vec::new()),
                ..DataUpdate::default()
            }),
        );
        assert_eq!(state.categories, vec![cat]);
    }

    #[test]
    fn test_orders_are_prepended() {
        let first = Order::new("1", Vec::new(), 100.0, None, OrderStatus::Pending);
        let second = Order::new("2", Vec::new(), 200.0, None, OrderStatus::Pending);
        let state = reduce(AppState::default(), AppAction::AddOrder(first));
        let state = reduce(state, AppAction::AddOrder(second));
        assert_eq!(state.orders[0].order_id, "2");
    }

    #[test]
    fn test_store_cart_actions_and_reset() {
        let store = Store::new();
        store.dispatch(AppAction::SetUser(Some(user())));
        store.dispatch(AppAction::AddToCart(CartLine::new("1", "Garba", 1500.0, 1)));
        store.dispatch(AppAction::AddToCart(CartLine::new("1", "Garba", 1500.0, 1)));
        assert_eq!(store.cart()[0].quantity, 2);

        let line_id = store.cart()[0].line_id.clone();
        store.dispatch(AppAction::UpdateCartItem { line_id, quantity: 0 });
        assert!(store.cart().is_empty());

        store.dispatch(AppAction::Reset);
        assert_eq!(store.snapshot(), AppState::default());
    }

    #[test]
    fn test_store_steps_cart_line() {
        let store = Store::new();
        store.dispatch(AppAction::AddToCart(CartLine::new("1", "Garba", 1500.0, 2)));
        let line_id = store.cart()[0].line_id.clone();

        store.dispatch(AppAction::StepCartItem { line_id: line_id.clone(), delta: 1 });
        assert_eq!(store.cart()[0].quantity, 3);
        store.dispatch(AppAction::StepCartItem { line_id, delta: -3 });
        assert!(store.cart().is_empty());
    }

    #[test]
    fn test_store_keeps_state_after_poisoned_lock() {
        let store = Store::new();
        store.dispatch(AppAction::AddToCart(CartLine::new("1", "Garba", 1500.0, 1)));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.read(|_| panic!("screen crashed while rendering"))
        }));
        assert!(outcome.is_err());

        store.dispatch(AppAction::AddToCart(CartLine::new("2", "Alloco", 1000.0, 1)));
        let cart = store.cart();
        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0].display_name, "Garba");
    }
}
