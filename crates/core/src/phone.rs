use once_cell::sync::Lazy;
use regex::Regex;

// E.164: leading '+', 8-15 digits, no leading zero.
static E164: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9][0-9]{7,14}$").expect("E.164 regex is valid"));

/// Validates an E.164 formatted phone number.
pub fn validate_e164(number: &str) -> bool {
    E164.is_match(number)
}

/// Strips the leading '+' for the provider wire format (digits only).
pub fn digits_only(number: &str) -> String {
    number.trim_start_matches('+').to_string()
}

/// Re-adds the leading '+' to a digits-only provider number.
pub fn with_plus(number: &str) -> String {
    if number.starts_with('+') {
        number.to_string()
    } else {
        format!("+{}", number)
    }
}
