//! Customer reactivation: find customers who have not visited lately and
//! prepare a WhatsApp message for each.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{Backend, Query, Table};
use crate::checkout::whatsapp_url;
use crate::config::RestaurantInfo;
use crate::error::BackendError;
use crate::types::Customer;

pub const DEFAULT_INACTIVE_DAYS: i64 = 15;

/// Customers whose last visit is older than `days` days. Customers with no
/// recorded visit are not included.
pub async fn inactive_customers<B: Backend + ?Sized>(
    backend: &B,
    now: DateTime<Utc>,
    days: i64,
) -> Result<Vec<Customer>, BackendError> {
    let cutoff = now - Duration::days(days);
    let rows = backend
        .select(
            Table::Customers,
            &Query::new()
                .lt("derniere_visite", cutoff.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
                .order("derniere_visite", true),
        )
        .await?;
    let customers: Vec<Customer> = rows
        .iter()
        .filter_map(|row| match Customer::from_row(row) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "skipping unreadable customer row");
                None
            }
        })
        .collect();
    info!(days, count = customers.len(), "inactive customers found");
    Ok(customers)
}

pub fn reactivation_message(info: &RestaurantInfo, customer_name: &str) -> String {
    format!(
        "Bonjour {customer_name} ! 👋\n\nVous nous manquez chez *{}* ! 🍽️\n\nÇa fait un moment que nous ne vous avons pas vu. Pour votre prochaine visite, montrez ce message et profitez d'un *Bissap offert* ! 🥤\n\nÀ très vite !",
        info.name
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reactivation {
    pub customer: Customer,
    pub message: String,
    pub whatsapp_url: String,
}

/// One message per customer, in the order given. Customers whose stored
/// number cannot form a link are left out.
pub fn reactivation_campaign(info: &RestaurantInfo, customers: Vec<Customer>) -> Vec<Reactivation> {
    customers
        .into_iter()
        .filter_map(|customer| {
            let message = reactivation_message(info, &customer.name);
            match whatsapp_url(&customer.phone, &message) {
                Ok(url) => Some(Reactivation {
                    customer,
                    message,
                    whatsapp_url: url,
                }),
                Err(e) => {
                    warn!(customer_id = %customer.id, error = %e, "no WhatsApp link for customer");
                    None
                }
            }
        })
        .collect()
}
