//! Size limit parsing for `--min-size` / `--max-size`
//!
//! Accepted form: a number with an optional fraction, an optional unit suffix (`b`, `k`/`kb`,
//! `m`/`mb`, `g`/`gb`, binary multiples, case-insensitive) and an optional trailing byte
//! adjustment, e.g. `"1.5mb-1"` is `1.5 * 2^20 - 1` bytes.

use std::sync::LazyLock;

use crate::error::{Error, Result};

static SIZE_RE: LazyLock<Result<regex::Regex, regex::Error>> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)^(\d+(?:\.\d*)?|\.\d+)(b|kb?|mb?|gb?)?([+-]\d+)?$")
});

fn multiplier(unit: &str) -> u64 {
    match unit.to_ascii_lowercase().as_str() {
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => 1,
    }
}

/// Parse a size limit into a byte count; zero, negative and malformed values are rejected.
pub fn parse_size(text: &str) -> Result<u64> {
    let re = SIZE_RE
        .as_ref()
        .map_err(|err| Error::Validation(format!("size pattern failed to compile: {err}")))?;
    let invalid = || Error::Validation(format!("invalid size {text:?}"));
    let caps = re.captures(text.trim()).ok_or_else(invalid)?;
    let number: f64 = caps
        .get(1)
        .map(|m| m.as_str())
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;
    let mult = caps.get(2).map_or(1, |m| multiplier(m.as_str()));
    let adjustment: i128 = match caps.get(3) {
        Some(m) => m.as_str().parse().map_err(|_| invalid())?,
        None => 0,
    };
    #[allow(clippy::cast_possible_truncation)]
    let base = (number * mult as f64).floor() as i128;
    let total = base + adjustment;
    if total <= 0 {
        return Err(Error::Validation(format!(
            "size {text:?} must be greater than zero"
        )));
    }
    u64::try_from(total).map_err(|_| Error::Validation(format!("size {text:?} is too large")))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn plain_bytes() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("100b").unwrap(), 100);
        assert_eq!(parse_size("100B").unwrap(), 100);
    }

    #[test]
    fn binary_units() {
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn fractions_and_adjustments() {
        assert_eq!(parse_size("1.5mb-1").unwrap(), 1_572_863);
        assert_eq!(parse_size("1.5k").unwrap(), 1536);
        assert_eq!(parse_size(".5k").unwrap(), 512);
        assert_eq!(parse_size("1.k").unwrap(), 1024);
        assert_eq!(parse_size("1k+1").unwrap(), 1025);
    }

    #[test]
    fn rejects_non_positive_and_malformed() {
        for bad in ["0", "0k", "1b-1", "1b-5", "", "k", "1x", "1.5.5", "-1", "1 k", "1kk"] {
            assert!(
                matches!(parse_size(bad), Err(Error::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn units_scale_exactly(n in 1u64..1_000_000, unit in prop::sample::select(vec![
            ("b", 1u64), ("k", 1 << 10), ("kb", 1 << 10), ("m", 1 << 20), ("mb", 1 << 20),
            ("g", 1 << 30), ("gb", 1 << 30),
        ])) {
            prop_assert_eq!(parse_size(&format!("{}{}", n, unit.0)).unwrap(), n * unit.1);
        }

        #[test]
        fn adjustment_is_applied_in_bytes(n in 1u64..10_000, adj in 0u64..1000) {
            let base = n * 1024;
            prop_assert_eq!(parse_size(&format!("{n}k+{adj}")).unwrap(), base + adj);
            prop_assert_eq!(parse_size(&format!("{n}k-{adj}")).unwrap(), base - adj);
        }
    }
}
