//! Text normalization shared by the write path (ingestion) and the read path
//! (lookups), so a natural key always normalizes the same way.

use crate::error::{Error, Result};

/// Trims and collapses every run of internal whitespace to a single space.
pub fn collapse(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized form of food names and amino acid names.
pub fn identifier(raw: &str) -> String {
    collapse(raw).to_lowercase()
}

/// Source keys keep their case since they are frequently URLs.
pub fn source_key(raw: &str) -> Result<String> {
    non_empty(collapse(raw), "source")
}

pub fn food_name(raw: &str) -> Result<String> {
    non_empty(identifier(raw), "food name")
}

fn non_empty(value: String, field: &str) -> Result<String> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} is empty")));
    }
    Ok(value)
}

/// Parses decimal text written with either `,` or `.` as the decimal
/// separator. When both appear, the last one is the decimal separator and the
/// other is treated as a thousands separator.
pub fn decimal(raw: &str) -> Result<f64> {
    let text: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if text.is_empty() {
        return Err(Error::Validation("value is empty".to_string()));
    }

    let canonical = match (text.rfind(','), text.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => text.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => text.replace(',', ""),
        (Some(_), None) if text.matches(',').count() == 1 => text.replace(',', "."),
        (Some(_), None) => text.replace(',', ""),
        _ => text,
    };

    let value: f64 = canonical
        .parse()
        .map_err(|_| Error::Validation(format!("unparsable number {raw:?}")))?;
    if !value.is_finite() {
        return Err(Error::Validation(format!("non-finite number {raw:?}")));
    }
    Ok(value)
}

/// A concentration must be a finite, non-negative decimal.
pub fn concentration(raw: &str) -> Result<f64> {
    let value = decimal(raw)?;
    if value < 0.0 {
        return Err(Error::Validation(format!("negative concentration {raw:?}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_trimmed_collapsed_and_lowercased() {
        assert_eq!(identifier("  Chicken   Breast,\tcooked "), "chicken breast, cooked");
        assert_eq!(identifier("LYSINE"), "lysine");
    }

    #[test]
    fn source_keys_keep_case() {
        assert_eq!(
            source_key("  https://fdc.nal.usda.gov/Download ").unwrap(),
            "https://fdc.nal.usda.gov/Download"
        );
        assert!(matches!(source_key("   "), Err(Error::Validation(_))));
    }

    #[test]
    fn empty_food_name_is_rejected() {
        assert!(matches!(food_name(" \t "), Err(Error::Validation(_))));
    }

    #[test]
    fn decimal_accepts_both_separators() {
        assert_eq!(decimal("2600.5").unwrap(), 2600.5);
        assert_eq!(decimal("2600,5").unwrap(), 2600.5);
        assert_eq!(decimal("1.234,5").unwrap(), 1234.5);
        assert_eq!(decimal("1,234.5").unwrap(), 1234.5);
        assert_eq!(decimal("1,234,567").unwrap(), 1234567.0);
        assert_eq!(decimal(" 42 ").unwrap(), 42.0);
    }

    #[test]
    fn concentration_rejects_garbage_and_negatives() {
        assert!(matches!(concentration("n/a"), Err(Error::Validation(_))));
        assert!(matches!(concentration(""), Err(Error::Validation(_))));
        assert!(matches!(concentration("-3"), Err(Error::Validation(_))));
        assert!(matches!(concentration("inf"), Err(Error::Validation(_))));
        assert_eq!(concentration("0").unwrap(), 0.0);
    }
}
