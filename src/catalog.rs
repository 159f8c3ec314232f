//! Reference data: the startup refresh and menu/recipe management.

use serde_json::json;
use tracing::{error, info, warn};

use crate::app_state::{AppAction, DataUpdate, Store};
use crate::auth::{require, Permission, Role};
use crate::backend::{Backend, Query, Table};
use crate::error::{BackendError, PosError};
use crate::types::{
    Category, Employee, MenuItem, RecipeLink, StockUnit, DEFAULT_CATEGORY_COLOR,
    DEFAULT_CATEGORY_ICON,
};
use crate::validation;

/// Category filter value that matches every item.
pub const ALL_CATEGORIES: &str = "Tous";

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

fn parse_rows<T>(
    rows: &[serde_json::Value],
    table: Table,
    parse: impl Fn(&serde_json::Value) -> Result<T, BackendError>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match parse(row) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(table = %table, error = %e, "skipping unreadable row");
                None
            }
        })
        .collect()
}

/// Reload categories, the active menu, stock and active staff in one go and
/// publish them to the store. On failure the store's error is set and
/// nothing else changes.
pub async fn refresh_app_data<B: Backend + ?Sized>(
    backend: &B,
    store: &Store,
) -> Result<(), BackendError> {
    store.dispatch(AppAction::SetLoading(true));

    let all = Query::new();
    let active = Query::new().eq("actif", true);
    let fetched = tokio::try_join!(
        backend.select(Table::Categories, &all),
        backend.select(Table::Menu, &active),
        backend.select(Table::Stock, &all),
        backend.select(Table::Employees, &active),
    );
    let (category_rows, menu_rows, stock_rows, employee_rows) = match fetched {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "data refresh failed");
            store.dispatch(AppAction::SetError(Some(e.to_string())));
            store.dispatch(AppAction::SetLoading(false));
            return Err(e);
        }
    };

    let categories = parse_rows(&category_rows, Table::Categories, Category::from_row);
    let menu_items = parse_rows(&menu_rows, Table::Menu, |row| {
        MenuItem::from_row(row, &categories)
    });
    let stock_items = parse_rows(&stock_rows, Table::Stock, StockUnit::from_row);
    let employees = parse_rows(&employee_rows, Table::Employees, Employee::from_row);

    info!(
        categories = categories.len(),
        menu_items = menu_items.len(),
        stock_items = stock_items.len(),
        employees = employees.len(),
        "app data refreshed"
    );
    store.dispatch(AppAction::SetError(None));
    store.dispatch(AppAction::SetData(DataUpdate {
        categories: Some(categories),
        menu_items: Some(menu_items),
        stock_items: Some(stock_items),
        employees: Some(employees),
    }));
    Ok(())
}

// ---------------------------------------------------------------------------
// Browsing
// ---------------------------------------------------------------------------

/// Category tabs: [`ALL_CATEGORIES`] followed by each category name.
pub fn category_tabs(categories: &[Category]) -> Vec<String> {
    std::iter::once(ALL_CATEGORIES.to_string())
        .chain(categories.iter().map(|c| c.name.clone()))
        .collect()
}

/// Items in `category` (or any, for `None`/[`ALL_CATEGORIES`]) whose name
/// contains `search`, case-insensitively.
pub fn filter_menu<'a>(
    items: &'a [MenuItem],
    category: Option<&str>,
    search: &str,
) -> Vec<&'a MenuItem> {
    let needle = search.trim().to_lowercase();
    let category = category.filter(|c| *c != ALL_CATEGORIES);
    items
        .iter()
        .filter(|item| category.map_or(true, |c| item.category == c))
        .filter(|item| item.name.to_lowercase().contains(&needle))
        .collect()
}

// ---------------------------------------------------------------------------
// Menu management
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct NewMenuItem {
    pub name: String,
    pub price: f64,
    /// Category name, resolved against `categories`.
    pub category: String,
    pub description: Option<String>,
    pub image: Option<String>,
}

async fn find_category<B: Backend + ?Sized>(
    backend: &B,
    name: &str,
) -> Result<Option<Category>, BackendError> {
    let rows = backend
        .select(Table::Categories, &Query::new().eq("nom", name).limit(1))
        .await?;
    rows.first().map(Category::from_row).transpose()
}

pub async fn add_menu_item<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    item: NewMenuItem,
) -> Result<MenuItem, PosError> {
    require(role, Permission::ManageMenu)?;
    let name = item.name.trim();
    validation::validate_menu_item(name, item.price, &item.category)?;

    let category = find_category(backend, item.category.trim())
        .await?
        .ok_or_else(|| PosError::validation("Catégorie introuvable"))?;

    let stored = backend
        .insert(
            Table::Menu,
            json!({
                "nom": name,
                "prix": item.price,
                "categorie_id": category.id,
                "description": item.description,
                "image": item.image,
                "actif": true,
            }),
        )
        .await?;
    let created = MenuItem::from_row(&stored, std::slice::from_ref(&category))?;
    info!(item_id = %created.id, name = %created.name, price = created.price, "menu item added");
    Ok(created)
}

async fn update_menu_row<B: Backend + ?Sized>(
    backend: &B,
    item_id: &str,
    patch: serde_json::Value,
) -> Result<(), PosError> {
    let changed = backend
        .update(Table::Menu, &Query::by_id(item_id), patch)
        .await?;
    if changed == 0 {
        return Err(BackendError::NotFound(format!("menu item {item_id}")).into());
    }
    Ok(())
}

/// Show or hide an item on the menu. Hidden items are not loaded by
/// [`refresh_app_data`].
pub async fn set_availability<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    item_id: &str,
    available: bool,
) -> Result<(), PosError> {
    require(role, Permission::ManageMenu)?;
    update_menu_row(backend, item_id, json!({ "actif": available })).await?;
    info!(item_id, available, "menu availability changed");
    Ok(())
}

pub async fn update_price<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    item_id: &str,
    price: f64,
) -> Result<(), PosError> {
    require(role, Permission::ManageMenu)?;
    if !validation::is_valid_price(price) {
        return Err(PosError::validation("Prix invalide"));
    }
    update_menu_row(backend, item_id, json!({ "prix": price })).await?;
    info!(item_id, price, "menu price changed");
    Ok(())
}

/// Remove an item; its recipe links go with it.
pub async fn delete_menu_item<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    item_id: &str,
) -> Result<(), PosError> {
    require(role, Permission::ManageMenu)?;
    let removed = backend.delete(Table::Menu, &Query::by_id(item_id)).await?;
    if removed == 0 {
        return Err(BackendError::NotFound(format!("menu item {item_id}")).into());
    }
    info!(item_id, "menu item deleted");
    Ok(())
}

pub async fn add_category<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    name: &str,
    color: Option<&str>,
    icon: Option<&str>,
) -> Result<Category, PosError> {
    require(role, Permission::ManageMenu)?;
    let name = name.trim();
    if !validation::is_valid_name(name) {
        return Err(PosError::validation("Nom invalide"));
    }
    if find_category(backend, name).await?.is_some() {
        return Err(PosError::validation("Cette catégorie existe déjà"));
    }
    let stored = backend
        .insert(
            Table::Categories,
            json!({
                "nom": name,
                "couleur": color.unwrap_or(DEFAULT_CATEGORY_COLOR),
                "icone": icon.unwrap_or(DEFAULT_CATEGORY_ICON),
            }),
        )
        .await?;
    Ok(Category::from_row(&stored)?)
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

/// Link a stock unit to a menu item: each unit sold consumes
/// `consumed_per_unit` of it.
pub async fn add_recipe_link<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    menu_id: &str,
    stock_id: &str,
    consumed_per_unit: f64,
) -> Result<RecipeLink, PosError> {
    require(role, Permission::ManageMenu)?;
    if !validation::is_valid_quantity(consumed_per_unit) || consumed_per_unit <= 0.0 {
        return Err(PosError::validation("Quantité invalide"));
    }
    let stored = backend
        .insert(
            Table::RecipeLinks,
            json!({
                "menu_id": menu_id,
                "stock_id": stock_id,
                "quantite_consommee": consumed_per_unit,
            }),
        )
        .await?;
    let link = RecipeLink::from_row(&stored)?;
    info!(menu_id, stock_id, consumed_per_unit, "recipe link added");
    Ok(link)
}

pub async fn recipe_for<B: Backend + ?Sized>(
    backend: &B,
    menu_id: &str,
) -> Result<Vec<RecipeLink>, BackendError> {
    let rows = backend
        .select(Table::RecipeLinks, &Query::new().eq("menu_id", menu_id))
        .await?;
    rows.iter().map(RecipeLink::from_row).collect()
}
