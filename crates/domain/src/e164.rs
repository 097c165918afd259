//! E.164 phone-number normalisation shared by DID lookups and tenant config.

use crate::error::{Error, Result};

/// Normalise a phone number to strict E.164 (`+` followed by 1-15 digits,
/// leading digit 1-9). Trims surrounding whitespace and strips internal
/// whitespace before validating, so `"+1 555 111 0002"` and
/// `"+15551110002"` normalise identically.
///
/// Idempotent: `normalize_e164(normalize_e164(x)?) == normalize_e164(x)`.
pub fn normalize_e164(raw: &str) -> Result<String> {
    let trimmed: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("DID must not be empty".into()));
    }
    if !is_e164(&trimmed) {
        return Err(Error::InvalidInput(format!(
            "\"{raw}\" is not a valid E.164 number"
        )));
    }
    Ok(trimmed)
}

fn is_e164(s: &str) -> bool {
    let mut chars = s.chars();
    if chars.next() != Some('+') {
        return false;
    }
    let digits: Vec<char> = chars.collect();
    if digits.is_empty() || digits.len() > 15 {
        return false;
    }
    if !matches!(digits[0], '1'..='9') {
        return false;
    }
    digits.iter().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_e164() {
        assert_eq!(normalize_e164("+15551110002").unwrap(), "+15551110002");
    }

    #[test]
    fn strips_internal_whitespace() {
        assert_eq!(
            normalize_e164(" +1 555 111 0002 ").unwrap(),
            "+15551110002"
        );
    }

    #[test]
    fn rejects_empty() {
        assert!(normalize_e164("").is_err());
        assert!(normalize_e164("   ").is_err());
    }

    #[test]
    fn rejects_missing_plus() {
        assert!(normalize_e164("15551110002").is_err());
    }

    #[test]
    fn rejects_leading_zero() {
        assert!(normalize_e164("+05551110002").is_err());
    }

    #[test]
    fn rejects_too_long() {
        assert!(normalize_e164("+1234567890123456").is_err());
    }

    #[test]
    fn idempotent() {
        let once = normalize_e164("+1 555 111 0002").unwrap();
        let twice = normalize_e164(&once).unwrap();
        assert_eq!(once, twice);
    }
}
