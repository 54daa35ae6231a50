use bigdecimal::BigDecimal;
use serde::Serialize;
use std::fmt;

pub const ORDER_REF_MAX_LEN: usize = 128;
pub const CUSTOMER_NAME_MAX_LEN: usize = 128;
pub const CUSTOMER_EMAIL_MAX_LEN: usize = 254;
pub const PAYMENT_URL_MAX_LEN: usize = 2048;
pub const PHONE_MIN_DIGITS: usize = 7;
pub const PHONE_MAX_DIGITS: usize = 15;
pub const CURRENCY_CODE_LEN: usize = 3;
/// Matches the `NUMERIC(20, 4)` column: 16 integer digits, 4 decimal places.
pub const AMOUNT_MAX_SCALE: i64 = 4;
pub const AMOUNT_MAX_INTEGER_DIGITS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amountDue", "must be greater than zero"));
    }

    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > AMOUNT_MAX_SCALE {
        return Err(ValidationError::new(
            "amountDue",
            format!("must have at most {} decimal places", AMOUNT_MAX_SCALE),
        ));
    }

    if amount >= &BigDecimal::from(10_u64.pow(AMOUNT_MAX_INTEGER_DIGITS)) {
        return Err(ValidationError::new(
            "amountDue",
            format!("must have at most {} integer digits", AMOUNT_MAX_INTEGER_DIGITS),
        ));
    }

    Ok(())
}

/// Sanitizes a required free-text field and checks its length.
pub fn clean_text(field: &'static str, value: &str, max_len: usize) -> Result<String, ValidationError> {
    let value = sanitize_string(value);
    validate_required(field, &value)?;
    validate_max_len(field, &value, max_len)?;
    Ok(value)
}

pub fn validate_email(email: &str) -> ValidationResult {
    validate_required("customerEmail", email)?;
    validate_max_len("customerEmail", email, CUSTOMER_EMAIL_MAX_LEN)?;

    let invalid = || ValidationError::new("customerEmail", "must be a valid email address");

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }

    let mut labels = domain.split('.');
    let valid_domain = domain.contains('.')
        && labels.all(|label| {
            !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        });
    if !valid_domain {
        return Err(invalid());
    }

    Ok(())
}

/// Normalizes a phone number to `+digits` / `digits`, dropping spaces, dashes
/// and parentheses.
pub fn normalize_phone(phone: &str) -> Result<String, ValidationError> {
    let trimmed = phone.trim();
    let (prefix, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };

    let digits: String = rest
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::new(
            "customerPhone",
            "must contain only digits, optionally prefixed with '+'",
        ));
    }

    if digits.len() < PHONE_MIN_DIGITS || digits.len() > PHONE_MAX_DIGITS {
        return Err(ValidationError::new(
            "customerPhone",
            format!(
                "must contain between {} and {} digits",
                PHONE_MIN_DIGITS, PHONE_MAX_DIGITS
            ),
        ));
    }

    Ok(format!("{}{}", prefix, digits))
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    if currency.len() != CURRENCY_CODE_LEN || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a three-letter uppercase ISO 4217 code",
        ));
    }

    Ok(())
}

pub fn validate_payment_url(payment_url: &str) -> ValidationResult {
    validate_max_len("paymentUrl", payment_url, PAYMENT_URL_MAX_LEN)?;

    let parsed = url::Url::parse(payment_url)
        .map_err(|_| ValidationError::new("paymentUrl", "must be a valid URL"))?;

    validate_enum("paymentUrl", parsed.scheme(), &["http", "https"])
}
