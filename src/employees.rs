//! Staff management. Every operation here needs [`Permission::ManageStaff`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{require, Permission, Role};
use crate::backend::{Backend, Query, Table};
use crate::error::{BackendError, PosError};
use crate::types::Employee;
use crate::validation::{self, LOCAL_PHONE_DIGITS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Inactive,
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Option<StatusFilter> {
        match raw.trim().to_lowercase().as_str() {
            "all" | "tous" => Some(StatusFilter::All),
            "active" | "actifs" => Some(StatusFilter::Active),
            "inactive" | "inactifs" => Some(StatusFilter::Inactive),
            _ => None,
        }
    }

    fn matches(&self, active: bool) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => active,
            StatusFilter::Inactive => !active,
        }
    }
}

pub fn filter_employees<'a>(
    employees: &'a [Employee],
    search: &str,
    status: StatusFilter,
) -> Vec<&'a Employee> {
    let needle = search.trim().to_lowercase();
    employees
        .iter()
        .filter(|e| e.name.to_lowercase().contains(&needle))
        .filter(|e| status.matches(e.active))
        .collect()
}

/// Every employee, active or not, ordered by name.
pub async fn list_employees<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
) -> Result<Vec<Employee>, PosError> {
    require(role, Permission::ManageStaff)?;
    let rows = backend
        .select(Table::Employees, &Query::new().order("nom", true))
        .await?;
    Ok(rows
        .iter()
        .map(Employee::from_row)
        .collect::<Result<Vec<_>, _>>()?)
}

pub async fn add_employee<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    name: &str,
    phone: &str,
    new_role: Role,
) -> Result<Employee, PosError> {
    require(role, Permission::ManageStaff)?;
    let name = name.trim();
    let phone: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    if name.is_empty() || phone.is_empty() {
        return Err(PosError::validation(
            "Le nom et le téléphone sont obligatoires.",
        ));
    }
    if !validation::is_local_phone(&phone) {
        return Err(PosError::validation(format!(
            "Le numéro doit comporter {LOCAL_PHONE_DIGITS} chiffres."
        )));
    }
    if !validation::is_valid_name(name) {
        return Err(PosError::validation("Nom invalide"));
    }

    let stored = backend
        .insert(
            Table::Employees,
            json!({
                "nom": name,
                "telephone": phone,
                "role": new_role.as_str(),
                "actif": true,
            }),
        )
        .await?;
    let employee = Employee::from_row(&stored)?;
    info!(employee_id = %employee.id, role = %employee.role, "employee added");
    Ok(employee)
}

/// Flip an employee's active flag; returns the new value.
pub async fn toggle_active<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    employee: &Employee,
) -> Result<bool, PosError> {
    require(role, Permission::ManageStaff)?;
    let active = !employee.active;
    let changed = backend
        .update(
            Table::Employees,
            &Query::by_id(&employee.id),
            json!({ "actif": active }),
        )
        .await?;
    if changed == 0 {
        return Err(BackendError::NotFound(format!("employee {}", employee.id)).into());
    }
    info!(employee_id = %employee.id, active, "employee status changed");
    Ok(active)
}

pub async fn delete_employee<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    employee_id: &str,
) -> Result<(), PosError> {
    require(role, Permission::ManageStaff)?;
    let removed = backend
        .delete(Table::Employees, &Query::by_id(employee_id))
        .await?;
    if removed == 0 {
        return Err(BackendError::NotFound(format!("employee {employee_id}")).into());
    }
    info!(employee_id, "employee deleted");
    Ok(())
}
