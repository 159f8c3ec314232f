//! Sales report over `commandes`: today's figures, payment mix, the 7-day
//! revenue series and the CSV export.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{require, Permission, Role};
use crate::backend::{Backend, Query, Table};
use crate::error::PosError;
use crate::types::{PaymentMethod, SalesRecord};

/// Days covered by the revenue series, today included.
pub const REPORT_DAYS: i64 = 7;

pub const CSV_HEADER: &str = "ID;Date;Montant;Mode de Paiement";

pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Dim",
        Weekday::Mon => "Lun",
        Weekday::Tue => "Mar",
        Weekday::Wed => "Mer",
        Weekday::Thu => "Jeu",
        Weekday::Fri => "Ven",
        Weekday::Sat => "Sam",
    }
}

/// Today's revenue per payment bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PaymentTotals {
    pub especes: f64,
    pub wave: f64,
    pub orange: f64,
    pub moov: f64,
    pub carte: f64,
}

impl PaymentTotals {
    /// Unrecorded modes count as cash; unknown ones and cheques are ignored.
    fn add(&mut self, payment_method: Option<&str>, amount: f64) {
        let method = match payment_method {
            None => Some(PaymentMethod::Cash),
            Some(raw) => PaymentMethod::parse(raw),
        };
        let slot = match method.and_then(|m| m.report_bucket()) {
            Some("especes") => &mut self.especes,
            Some("wave") => &mut self.wave,
            Some("orange") => &mut self.orange,
            Some("moov") => &mut self.moov,
            Some("carte") => &mut self.carte,
            _ => return,
        };
        *slot += amount;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTotal {
    pub date: NaiveDate,
    pub label: &'static str,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub revenue_today: f64,
    pub sales_today: usize,
    pub by_payment: PaymentTotals,
    /// Oldest day first, today last.
    pub last_days: Vec<DayTotal>,
    pub total_customers: usize,
    /// Today's orders, the rows exported to CSV.
    pub today_orders: Vec<SalesRecord>,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Aggregate already-fetched records as of `now`.
pub fn aggregate(records: &[SalesRecord], total_customers: usize, now: DateTime<Utc>) -> SalesReport {
    let today = now.date_naive();
    let first_day = today - Duration::days(REPORT_DAYS - 1);

    let mut last_days: Vec<DayTotal> = (0..REPORT_DAYS)
        .map(|offset| {
            let date = first_day + Duration::days(offset);
            DayTotal {
                date,
                label: weekday_label(date.weekday()),
                total: 0.0,
            }
        })
        .collect();

    let mut by_payment = PaymentTotals::default();
    let mut today_orders = Vec::new();
    for record in records {
        let day = record.created_at.date_naive();
        if let Some(slot) = last_days.iter_mut().find(|d| d.date == day) {
            slot.total += record.total;
        }
        if day == today {
            by_payment.add(record.payment_method.as_deref(), record.total);
            today_orders.push(record.clone());
        }
    }

    SalesReport {
        revenue_today: today_orders.iter().map(|r| r.total).sum(),
        sales_today: today_orders.len(),
        by_payment,
        last_days,
        total_customers,
        today_orders,
    }
}

/// Fetch the last [`REPORT_DAYS`] days of orders and the customer count, and
/// aggregate them. Restricted to roles that may view reports.
pub async fn sales_report<B: Backend + ?Sized>(
    backend: &B,
    role: Role,
    now: DateTime<Utc>,
) -> Result<SalesReport, PosError> {
    require(role, Permission::ViewReports)?;
    let since = start_of_day(now.date_naive() - Duration::days(REPORT_DAYS - 1));

    let rows = backend
        .select(
            Table::CustomerOrders,
            &Query::new()
                .gte("created_at", since.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
                .order("created_at", true),
        )
        .await?;
    let total_customers = backend.count(Table::Customers, &Query::new()).await?;

    let records: Vec<SalesRecord> = rows
        .iter()
        .filter_map(|row| match SalesRecord::from_row(row) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "skipping unreadable order row");
                None
            }
        })
        .collect();

    let report = aggregate(&records, total_customers, now);
    info!(
        orders = records.len(),
        revenue_today = report.revenue_today,
        sales_today = report.sales_today,
        "sales report built"
    );
    Ok(report)
}

fn csv_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        amount.to_string()
    }
}

/// `ID;Date;Montant;Mode de Paiement` lines, dates as `dd/mm/yyyy`.
pub fn export_csv(records: &[SalesRecord]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for r in records {
        out.push_str(&format!(
            "{};{};{};{}\n",
            r.id,
            r.created_at.format("%d/%m/%Y"),
            csv_amount(r.total),
            r.payment_method.as_deref().unwrap_or("")
        ));
    }
    out
}

pub fn csv_file_name(date: NaiveDate) -> String {
    format!("RAPPORT_VENTES_{}.csv", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::error::BackendError;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(id: &str, at: DateTime<Utc>, total: f64, method: Option<&str>) -> SalesRecord {
        SalesRecord {
            id: id.into(),
            created_at: at,
            total,
            payment_method: method.map(String::from),
        }
    }

    #[test]
    fn test_aggregate_today_and_week() {
        // Saturday 1 March 2025
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        let records = vec![
            record("1", Utc.with_ymd_and_hms(2025, 2, 20, 12, 0, 0).unwrap(), 999.0, None),
            record("2", Utc.with_ymd_and_hms(2025, 2, 24, 12, 0, 0).unwrap(), 3000.0, Some("wave")),
            record("3", Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(), 1500.0, Some("especes")),
            record("4", Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(), 2000.0, Some("orange_money")),
            record("5", Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap(), 500.0, None),
            record("6", Utc.with_ymd_and_hms(2025, 3, 1, 14, 0, 0).unwrap(), 700.0, Some("cheque")),
        ];
        let report = aggregate(&records, 12, now);

        assert_eq!(report.sales_today, 4);
        assert_eq!(report.revenue_today, 4700.0);
        assert_eq!(report.by_payment.especes, 2000.0);
        assert_eq!(report.by_payment.orange, 2000.0);
        assert_eq!(report.by_payment.wave, 0.0);
        assert_eq!(report.total_customers, 12);

        let labels: Vec<&str> = report.last_days.iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["Dim", "Lun", "Mar", "Mer", "Jeu", "Ven", "Sam"]);
        assert_eq!(report.last_days[1].total, 3000.0);
        assert_eq!(report.last_days[6].total, 4700.0);
    }

    #[test]
    fn test_export_csv() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let csv = export_csv(&[
            record("7", at, 4500.0, Some("wave")),
            record("8", at, 12.5, None),
        ]);
        assert_eq!(
            csv,
            "ID;Date;Montant;Mode de Paiement\n7;01/03/2025;4500;wave\n8;01/03/2025;12.5;\n"
        );
        assert_eq!(csv_file_name(at.date_naive()), "RAPPORT_VENTES_2025-03-01.csv");
    }

    #[tokio::test]
    async fn test_sales_report_reads_backend() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let now = Utc::now();
        b.insert(Table::Customers, json!({ "nom": "Kouassi", "telephone": "0707070707" }))
            .await
            .expect("customer");
        b.insert(
            Table::CustomerOrders,
            json!({ "total": 3000, "payment_method": "wave", "created_at": now.to_rfc3339() }),
        )
        .await
        .expect("order");
        b.insert(
            Table::CustomerOrders,
            json!({ "total": 800, "created_at": (now - Duration::days(30)).to_rfc3339() }),
        )
        .await
        .expect("old order");

        let report = sales_report(&b, Role::Manager, now).await.expect("report");
        assert_eq!(report.sales_today, 1);
        assert_eq!(report.by_payment.wave, 3000.0);
        assert_eq!(report.total_customers, 1);
    }

    #[tokio::test]
    async fn test_sales_report_is_restricted() {
        let b = SqliteBackend::open_in_memory().expect("backend");
        let err = sales_report(&b, Role::Cashier, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PosError::Backend(BackendError::Forbidden(_))));
    }
}
