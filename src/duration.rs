// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Duration parsing for Go-style duration strings.
//!
//! Supports parsing duration strings in Go format (e.g., "500ms", "20s", "1m30s") into
//! Rust `std::time::Duration`. Used for every interval and timeout setting.

use anyhow::{bail, Context, Result};
use std::time::Duration;

const NANOS_PER_MICRO: f64 = 1_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;
const NANOS_PER_MINUTE: f64 = 60.0 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: f64 = 3600.0 * NANOS_PER_SECOND;

/// Parse a Go-style duration string into a Rust `Duration`.
///
/// A duration is a sequence of decimal numbers, each with an optional fraction
/// and a unit suffix. Supported units:
/// - `ns`, `us` (or `µs`), `ms`
/// - `s`, `m`, `h`
///
/// # Examples
///
/// ```
/// use skopos::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
///
/// // Invalid formats return errors
/// assert!(parse_duration("").is_err());
/// assert!(parse_duration("10").is_err());  // Missing unit
/// assert!(parse_duration("10x").is_err()); // Invalid unit
/// ```
///
/// # Errors
///
/// Returns an error if:
/// - The string is empty or negative
/// - A number is missing its unit, or the unit is unknown
/// - The value overflows
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let input = duration_str.trim();

    if input.is_empty() {
        bail!("Duration string cannot be empty");
    }

    if input.starts_with('-') {
        bail!("Duration '{duration_str}' cannot be negative");
    }

    // Go accepts a bare zero
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = input.strip_prefix('+').unwrap_or(input);
    let mut total_nanos = 0.0_f64;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .with_context(|| format!("Duration '{duration_str}' must end with a unit"))?;

        if number_end == 0 {
            bail!("Duration '{duration_str}' has a unit without a value");
        }

        let (number, after_number) = rest.split_at(number_end);
        let value: f64 = number
            .parse()
            .with_context(|| format!("Invalid number '{number}' in duration '{duration_str}'"))?;

        let unit_end = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, remainder) = after_number.split_at(unit_end);

        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_MINUTE,
            "h" => NANOS_PER_HOUR,
            _ => bail!(
                "Unsupported duration unit '{unit}'. Use 'ns', 'us', 'ms', 's', 'm' or 'h'"
            ),
        };

        total_nanos += value * scale;
        rest = remainder;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        bail!("Duration '{duration_str}' is too large (overflow)");
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod duration_tests;
