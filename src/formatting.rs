//! Display helpers: FCFA amounts, French dates and labels.

use chrono::{DateTime, Datelike, Timelike, Utc};

const MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// `12500.0` → `"12 500 FCFA"`. Fractions are kept only when present
/// (`12.5` → `"12,5 FCFA"`), with at most two decimals.
pub fn format_price(price: f64) -> String {
    let negative = price < 0.0;
    let cents = (price.abs() * 100.0).round() as u64;
    let (whole, frac) = (cents / 100, cents % 100);

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    let mut out = String::new();
    if negative && cents > 0 {
        out.push('-');
    }
    out.push_str(&grouped);
    if frac > 0 {
        let decimals = format!("{frac:02}");
        out.push(',');
        out.push_str(decimals.trim_end_matches('0'));
    }
    out.push_str(" FCFA");
    out
}

/// `"1 mars 2025"`.
pub fn format_date(date: &DateTime<Utc>) -> String {
    format!(
        "{} {} {}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

/// `"14:05"`.
pub fn format_time(time: &DateTime<Utc>) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

pub fn format_date_time(date: &DateTime<Utc>) -> String {
    format!("{} à {}", format_date(date), format_time(date))
}

/// Quantity with two decimals and its unit: `"2.50 kg"`.
pub fn format_quantity(quantity: f64, unit: &str) -> String {
    format!("{quantity:.2} {unit}")
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_role(role: &str) -> String {
    match role.to_lowercase().as_str() {
        "admin" => "Administrateur".to_string(),
        "manager" => "Gérant".to_string(),
        "staff" => "Personnel".to_string(),
        "chef" => "Chef".to_string(),
        "waiter" => "Serveur".to_string(),
        "cashier" => "Caissier".to_string(),
        _ => capitalize(role),
    }
}

pub fn format_order_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "pending" => "En attente".to_string(),
        "preparing" => "En préparation".to_string(),
        "ready" => "Prête".to_string(),
        "paid" => "Payée".to_string(),
        "completed" | "complete" => "Complété".to_string(),
        "cancelled" => "Annulé".to_string(),
        _ => capitalize(status),
    }
}

pub fn format_payment_method(method: &str) -> String {
    match method.to_lowercase().as_str() {
        "cash" | "especes" => "Espèces".to_string(),
        "card" | "carte" => "Carte".to_string(),
        "check" | "cheque" => "Chèque".to_string(),
        "wave" => "Wave".to_string(),
        "orange_money" | "orange" => "Orange Money".to_string(),
        "moov" => "Moov Money".to_string(),
        _ => capitalize(method),
    }
}

/// Stock position relative to a min/max band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockBand {
    Low,
    Normal,
    High,
}

pub fn stock_band(quantity: f64, min_quantity: f64, max_quantity: f64) -> StockBand {
    if quantity <= min_quantity {
        StockBand::Low
    } else if quantity >= max_quantity {
        StockBand::High
    } else {
        StockBand::Normal
    }
}

pub fn format_stock_band(band: StockBand) -> &'static str {
    match band {
        StockBand::Low => "Stock faible",
        StockBand::Normal => "Stock normal",
        StockBand::High => "Stock élevé",
    }
}

/// Cut to `length` characters and append `...` when longer.
pub fn truncate_text(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        return text.to_string();
    }
    let head: String = text.chars().take(length).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(12500.0), "12 500 FCFA");
        assert_eq!(format_price(0.0), "0 FCFA");
        assert_eq!(format_price(1_250_000.0), "1 250 000 FCFA");
        assert_eq!(format_price(12.5), "12,5 FCFA");
        assert_eq!(format_price(10500.0), "10 500 FCFA");
    }

    #[test]
    fn test_format_date_time() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 1, 14, 5, 0).unwrap();
        assert_eq!(format_date(&dt), "1 mars 2025");
        assert_eq!(format_time(&dt), "14:05");
        assert_eq!(format_date_time(&dt), "1 mars 2025 à 14:05");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("hello"), "Hello");
        assert_eq!(capitalize("HELLO"), "HELLO");
        assert_eq!(capitalize("éric"), "Éric");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_labels() {
        assert_eq!(format_role("admin"), "Administrateur");
        assert_eq!(format_role("manager"), "Gérant");
        assert_eq!(format_role("staff"), "Personnel");
        assert_eq!(format_role("unknown"), "Unknown");
        assert_eq!(format_order_status("pending"), "En attente");
        assert_eq!(format_order_status("completed"), "Complété");
        assert_eq!(format_order_status("cancelled"), "Annulé");
        assert_eq!(format_payment_method("cash"), "Espèces");
        assert_eq!(format_payment_method("card"), "Carte");
        assert_eq!(format_payment_method("check"), "Chèque");
        assert_eq!(format_payment_method("orange_money"), "Orange Money");
    }

    #[test]
    fn test_stock_band() {
        assert_eq!(stock_band(5.0, 10.0, 30.0), StockBand::Low);
        assert_eq!(stock_band(10.0, 10.0, 30.0), StockBand::Low);
        assert_eq!(stock_band(30.0, 10.0, 30.0), StockBand::High);
        assert_eq!(stock_band(35.0, 10.0, 30.0), StockBand::High);
        assert_eq!(stock_band(20.0, 10.0, 30.0), StockBand::Normal);
        assert_eq!(format_stock_band(StockBand::High), "Stock élevé");
    }

    #[test]
    fn test_truncate_and_quantity() {
        assert_eq!(truncate_text("Hello World", 5), "Hello...");
        assert_eq!(truncate_text("Hi", 5), "Hi");
        assert_eq!(format_quantity(2.5, "kg"), "2.50 kg");
        assert_eq!(format_quantity(10.0, "pcs"), "10.00 pcs");
    }
}
