//! Input validation shared by the key service and orchestrator.
//!
//! Every helper trims its input and returns the cleaned value, so callers
//! never persist untrimmed data.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ServiceError, codes};
use crate::providers::KNOWN_PROVIDER_IDS;

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]{10,30}$").expect("phone pattern is valid"));

/// Trims `value` and rejects it when empty.
pub fn required(value: &str, code: &'static str, field: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(code, format!("{field} is required")).with_field(field, ""));
    }
    Ok(trimmed.to_string())
}

/// Trims an optional value, mapping blank strings to `None`.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalizes a customer phone number to international digits.
///
/// A leading `+` is dropped. Ten digits starting with `7` get a country `7`
/// prefixed, and the domestic trunk form `87…` is rewritten to `77…`. The
/// result must be 11 to 31 digits without a leading zero.
pub fn normalize_phone(raw: &str) -> Result<String, ServiceError> {
    let phone = required(raw, codes::CUSTOMER_PHONE_REQUIRED, "customer_phone")?;
    let phone = phone.strip_prefix('+').unwrap_or(phone.as_str());

    let normalized = if phone.len() == 10 && phone.starts_with('7') {
        format!("7{phone}")
    } else if phone.len() == 11 && phone.starts_with("87") {
        format!("7{}", &phone[1..])
    } else {
        phone.to_string()
    };

    if !PHONE_PATTERN.is_match(&normalized) {
        return Err(
            ServiceError::validation(codes::INVALID_PHONE, "customer phone is malformed")
                .with_field("customer_phone", raw.trim()),
        );
    }
    Ok(normalized)
}

/// Rejects page sizes outside `1..=max`.
pub fn page_size(page_size: u64, max: u64) -> Result<u64, ServiceError> {
    if page_size == 0 || page_size > max {
        return Err(ServiceError::validation(
            codes::INCORRECT_PAGE_SIZE,
            format!("page_size must be between 1 and {max}"),
        )
        .with_field("page_size", page_size.to_string()));
    }
    Ok(page_size)
}

/// Accepts a blank provider id (unknown vendor) or one of the registered vendor ids.
pub fn provider_id(value: Option<&str>) -> Result<Option<String>, ServiceError> {
    match optional(value) {
        None => Ok(None),
        Some(id) if KNOWN_PROVIDER_IDS.contains(&id.as_str()) => Ok(Some(id)),
        Some(id) => Err(ServiceError::validation(
            codes::INVALID_PROVIDER_ID,
            format!("unknown provider id '{id}'"),
        )
        .with_field("provider_id", id)),
    }
}
