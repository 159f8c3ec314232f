//! Staff roles, permissions and login.
//!
//! Staff log in with their phone number and password, and confirm each sale
//! with a 4-digit PIN. Permissions are granted per role; the same table is
//! consulted by [`crate::backend::GuardedBackend`] before any write reaches
//! the backend, so hiding a button is never the only check.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{Backend, Query, Table};
use crate::error::{BackendError, PosError};
use crate::types::{Employee, User};
use crate::validation;

// ---------------------------------------------------------------------------
// Roles & permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Staff,
    Waiter,
    Chef,
    Cashier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Ring up sales, send tickets, register customers.
    Sell,
    /// Decrement stock as a consequence of a sale.
    ConsumeStock,
    /// Set stock quantities by hand, add or remove stock units.
    EditStock,
    /// Move kitchen tickets along.
    Kitchen,
    ManageMenu,
    ManageStaff,
    ViewReports,
}

/// Permissions granted to administrators and managers.
const MANAGEMENT_PERMISSIONS: &[Permission] = &[
    Permission::Sell,
    Permission::ConsumeStock,
    Permission::EditStock,
    Permission::Kitchen,
    Permission::ManageMenu,
    Permission::ManageStaff,
    Permission::ViewReports,
];

const CHEF_PERMISSIONS: &[Permission] = &[
    Permission::Sell,
    Permission::ConsumeStock,
    Permission::EditStock,
    Permission::Kitchen,
];

const FLOOR_PERMISSIONS: &[Permission] = &[
    Permission::Sell,
    Permission::ConsumeStock,
    Permission::Kitchen,
];

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Manager,
        Role::Staff,
        Role::Waiter,
        Role::Chef,
        Role::Cashier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Staff => "staff",
            Role::Waiter => "waiter",
            Role::Chef => "chef",
            Role::Cashier => "cashier",
        }
    }

    /// Parse a stored role string. Unknown roles fall back to `Staff`, the
    /// least privileged role, which is also what new accounts default to.
    pub fn parse(raw: &str) -> Role {
        match raw.trim().to_lowercase().as_str() {
            "admin" | "administrateur" => Role::Admin,
            "manager" | "gerant" | "gérant" => Role::Manager,
            "waiter" | "serveur" => Role::Waiter,
            "chef" | "cuisinier" => Role::Chef,
            "cashier" | "caissier" => Role::Cashier,
            _ => Role::Staff,
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin | Role::Manager => MANAGEMENT_PERMISSIONS,
            Role::Chef => CHEF_PERMISSIONS,
            Role::Staff | Role::Waiter | Role::Cashier => FLOOR_PERMISSIONS,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fail with `Forbidden` unless `role` holds `permission`.
pub fn require(role: Role, permission: Permission) -> Result<(), BackendError> {
    if role.can(permission) {
        Ok(())
    } else {
        Err(BackendError::Forbidden(format!(
            "role '{role}' lacks {permission:?}"
        )))
    }
}

/// Same check against an optional session; no session means no access.
pub fn require_user(user: Option<&User>, permission: Permission) -> Result<Role, BackendError> {
    let role = user
        .map(|u| u.role)
        .ok_or_else(|| BackendError::Forbidden("no active session".into()))?;
    require(role, permission)?;
    Ok(role)
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

const MIN_PASSWORD_LEN: usize = 4;
const PIN_LEN: usize = 4;

/// Phone/password login against the `employes` table.
pub async fn login<B: Backend + ?Sized>(
    backend: &B,
    phone: &str,
    password: &str,
) -> Result<User, PosError> {
    let clean_phone: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    if !validation::is_valid_phone(&clean_phone) {
        return Err(PosError::validation(
            "Veuillez entrer un numéro valide (10 chiffres)",
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PosError::validation("Le mot de passe est trop court"));
    }

    let rows = backend
        .select(
            Table::Employees,
            &Query::new().eq("telephone", clean_phone.as_str()).limit(1),
        )
        .await?;
    let employee = rows
        .first()
        .and_then(|row| Employee::from_row(row).ok())
        .ok_or_else(|| PosError::validation("Compte introuvable ou numéro incorrect"))?;

    if !employee.active {
        warn!(employee_id = %employee.id, "login refused: account disabled");
        return Err(PosError::validation(
            "Ce compte est désactivé. Contactez la direction.",
        ));
    }
    if let Some(expected) = employee.password.as_deref() {
        if expected != password {
            return Err(PosError::validation("Mot de passe incorrect"));
        }
    }

    info!(employee_id = %employee.id, role = %employee.role, "staff login");
    Ok(User::from(&employee))
}

/// Check a 4-digit sale PIN. Returns the cashier's name on success and
/// `None` for a wrong PIN or an inactive employee.
pub async fn verify_pin<B: Backend + ?Sized>(
    backend: &B,
    pin: &str,
) -> Result<Option<String>, PosError> {
    let pin = pin.trim();
    if pin.len() != PIN_LEN || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::validation("Le code PIN doit comporter 4 chiffres"));
    }

    let rows = backend
        .select(Table::Employees, &Query::new().eq("code_pin", pin))
        .await?;
    let cashier = rows
        .iter()
        .filter_map(|row| Employee::from_row(row).ok())
        .find(|e| e.active)
        .map(|e| e.name);
    if cashier.is_none() {
        warn!("sale PIN rejected");
    }
    Ok(cashier)
}
