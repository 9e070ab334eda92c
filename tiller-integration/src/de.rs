use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Determine whether a wire string denotes a missing numeric value.
///
/// Producers written in looser languages emit `""`, `"none"`, `"null"` or `"nan"` where a
/// number is absent; all are treated as missing, case-insensitively.
pub fn is_missing_num(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.is_empty() || {
        let lower = trimmed.to_ascii_lowercase();
        matches!(lower.as_str(), "none" | "null" | "nan")
    }
}

/// Parse a wire decimal string, mapping the conventional missing markers to `None`.
pub fn lenient_decimal(s: &str) -> Option<Decimal> {
    if is_missing_num(s) {
        None
    } else {
        Decimal::from_str(s.trim()).ok()
    }
}

/// Parse a decimal out of a JSON value that may arrive as a string or a bare number.
pub fn lenient_decimal_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => lenient_decimal(s),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Parse an RFC3339 timestamp (including the `Z` suffix) into `DateTime<Utc>`.
pub fn rfc3339_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an RFC3339 timestamp out of a JSON string value.
pub fn rfc3339_utc_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(rfc3339_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lenient_decimal() {
        struct TestCase {
            input: &'static str,
            expected: Option<Decimal>,
        }

        let cases = vec![
            TestCase {
                input: "1.23456",
                expected: Some(dec!(1.23456)),
            },
            TestCase {
                input: " 0.9981 ",
                expected: Some(dec!(0.9981)),
            },
            TestCase {
                input: "",
                expected: None,
            },
            TestCase {
                input: "none",
                expected: None,
            },
            TestCase {
                input: "NULL",
                expected: None,
            },
            TestCase {
                input: "NaN",
                expected: None,
            },
            TestCase {
                input: "not-a-number",
                expected: None,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(lenient_decimal(test.input), test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_lenient_decimal_value_accepts_numbers_and_strings() {
        assert_eq!(
            lenient_decimal_value(&serde_json::json!("1.10")),
            Some(dec!(1.10))
        );
        assert_eq!(lenient_decimal_value(&serde_json::json!(42)), Some(dec!(42)));
        assert_eq!(lenient_decimal_value(&serde_json::json!(null)), None);
        assert_eq!(lenient_decimal_value(&serde_json::json!("nan")), None);
    }

    #[test]
    fn test_rfc3339_utc_accepts_zulu_suffix() {
        let parsed = rfc3339_utc("2024-01-01T00:30:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T00:30:00+00:00");
    }
}
