//! Input checks run before anything is sent to the backend.
//!
//! The `is_*` predicates answer yes/no; the `validate_*` functions return the
//! French message shown to staff.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;
use crate::types::{CartLine, PaymentMethod};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+]?[(]?[0-9]{1,4}[)]?[-.]?[(]?[0-9]{1,4}[)]?[-.]?[0-9]{1,9}$")
        .expect("phone pattern")
});
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-1][0-9]|2[0-3]):[0-5][0-9]$").expect("time pattern"));
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern"));

const MAX_NAME_LEN: usize = 100;
const MIN_PASSWORD_LEN: usize = 8;
/// Ivorian numbers are entered without the country code.
pub const LOCAL_PHONE_DIGITS: usize = 10;

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            "Le mot de passe doit contenir au moins 8 caractères",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "Le mot de passe doit contenir au moins une lettre majuscule",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new(
            "Le mot de passe doit contenir au moins un chiffre",
        ));
    }
    Ok(())
}

/// Loose phone check (optional `+`, groups, separators). Whitespace is ignored.
pub fn is_valid_phone(phone: &str) -> bool {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    PHONE_RE.is_match(&compact)
}

/// Exactly ten digits once whitespace is removed.
pub fn is_local_phone(phone: &str) -> bool {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() == LOCAL_PHONE_DIGITS && compact.chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_NAME_LEN
}

pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

pub fn is_valid_quantity(quantity: f64) -> bool {
    quantity.is_finite() && quantity >= 0.0
}

/// `HH:mm`, 24-hour clock.
pub fn is_valid_time(time: &str) -> bool {
    TIME_RE.is_match(time)
}

/// `YYYY-MM-DD` naming a real calendar day.
pub fn is_valid_date(date: &str) -> bool {
    DATE_RE.is_match(date) && NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

pub fn is_not_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

pub fn validate_cart_line(line: &CartLine) -> Result<(), ValidationError> {
    if line.catalog_item_id.trim().is_empty() {
        return Err(ValidationError::new("ID du menu requis"));
    }
    if line.quantity == 0 {
        return Err(ValidationError::new("Quantité invalide"));
    }
    if !is_valid_price(line.unit_price) {
        return Err(ValidationError::new("Prix invalide"));
    }
    Ok(())
}

/// Checks an order before it is recorded. Accepts every payment mode the
/// register offers.
pub fn validate_order(
    lines: &[CartLine],
    total: f64,
    payment_method: &str,
) -> Result<PaymentMethod, ValidationError> {
    if lines.is_empty() {
        return Err(ValidationError::new(
            "La commande doit contenir au moins un article",
        ));
    }
    for line in lines {
        validate_cart_line(line)?;
    }
    if !is_valid_price(total) {
        return Err(ValidationError::new("Total invalide"));
    }
    PaymentMethod::parse(payment_method)
        .ok_or_else(|| ValidationError::new("Méthode de paiement invalide"))
}

pub fn validate_menu_item(name: &str, price: f64, category: &str) -> Result<(), ValidationError> {
    if !is_valid_name(name) {
        return Err(ValidationError::new("Nom invalide"));
    }
    if !is_valid_price(price) {
        return Err(ValidationError::new("Prix invalide"));
    }
    if category.trim().is_empty() {
        return Err(ValidationError::new("Catégorie requise"));
    }
    Ok(())
}
