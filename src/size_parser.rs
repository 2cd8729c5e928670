//! Size string parser.
//!
//! Interprets Apache-autoindex-style size strings of the form
//! `"<number> <unit>"`, e.g. `"20 B"`, `"2.5 MiB"`.

use crate::error::EngineError;

/// Returns the exact byte count when the string already expresses bytes
/// (`" B"` suffix), else `None`. Never fails -- a string that isn't an
/// exact byte count simply isn't exact.
pub fn exact_size_bytes(size: &str) -> Option<u64> {
    let (number, unit) = split_number_unit(size)?;
    if unit != "B" {
        return None;
    }
    number.parse::<u64>().ok()
}

/// Returns the approximate byte count using the multiplier table
/// `{B: 1, KiB: 1024, MiB: 1024^2, GiB: 1024^3}`.
pub fn approximate_size_bytes(size: &str) -> Result<u64, EngineError> {
    let (number, unit) = split_number_unit(size)
        .ok_or_else(|| EngineError::UnknownUnit(size.to_string()))?;
    let value: f64 = number
        .parse()
        .map_err(|_| EngineError::UnknownUnit(size.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::UnknownUnit(size.to_string()));
    }
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        other => return Err(EngineError::UnknownUnit(other.to_string())),
    };
    Ok((value * multiplier).round() as u64)
}

fn split_number_unit(size: &str) -> Option<(&str, &str)> {
    let trimmed = size.trim();
    let mut parts = trimmed.splitn(2, ' ');
    let number = parts.next()?;
    let unit = parts.next()?.trim();
    if number.is_empty() || unit.is_empty() {
        return None;
    }
    Some((number, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_parses_b_suffix_only() {
        assert_eq!(exact_size_bytes("20 B"), Some(20));
        assert_eq!(exact_size_bytes("2.5 MiB"), None);
    }

    #[test]
    fn approximate_multiplier_table() {
        assert_eq!(approximate_size_bytes("20 B").unwrap(), 20);
        assert_eq!(approximate_size_bytes("1 KiB").unwrap(), 1024);
        assert_eq!(approximate_size_bytes("2.5 MiB").unwrap(), 2621440);
        assert_eq!(approximate_size_bytes("1 GiB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn unknown_unit_errors() {
        assert!(approximate_size_bytes("3 TiB").is_err());
        assert!(approximate_size_bytes("garbage").is_err());
    }

    #[test]
    fn rejects_negative_and_nonfinite() {
        assert!(approximate_size_bytes("-1 B").is_err());
        assert!(approximate_size_bytes("nan MiB").is_err());
    }
}
