//! Phone number normalization.
//!
//! Every number that crosses the coordination core (sender accounts and
//! debtor numbers alike) goes through the same transform so that
//! differently-formatted inputs collapse onto one key.

/// Country prefix added to national numbers.
pub const NATIONAL_PREFIX: &str = "55";

/// Digit inserted after the area code of 12-digit numbers.
pub const MOBILE_INDICATOR: char = '9';

/// Length of a fully normalized number (country + area + 9-digit mobile).
pub const ACCOUNT_ID_LEN: usize = 13;

/// Strip everything but ASCII digits.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a phone number to its registry-query form.
///
/// - Non-digits are removed.
/// - 10 or 11 digit numbers without the country prefix get it prepended.
/// - A 12-digit result gets the mobile indicator inserted after the area
///   code (position 4).
///
/// Returns an empty string when the input has no digits.
pub fn normalize(raw: &str) -> String {
    let mut digits = digits_only(raw);
    if !digits.starts_with(NATIONAL_PREFIX) && matches!(digits.len(), 10 | 11) {
        digits.insert_str(0, NATIONAL_PREFIX);
    }
    if digits.len() == 12 {
        digits.insert(4, MOBILE_INDICATOR);
    }
    digits
}

/// Clean a raw spreadsheet cell before it enters a validation list.
///
/// Numeric cells exported through a float column come back as
/// `"11988887777.0"`; the trailing `.0` is dropped.
pub fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// Key a raw batch cell is validated and looked up under.
///
/// Both the validator and the reachable-row filter go through here, so a
/// `.0` cell and its plain spelling resolve to the same record.
pub fn record_key(raw: &str) -> String {
    normalize(&clean_cell(raw))
}
