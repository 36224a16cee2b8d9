//! Duration text parsing.
//!
//! Accepts the compact `<number><unit>` sequences operators already use for
//! dispatcher timeouts: `"300ms"`, `"5s"`, `"1m30s"`, `"1.5h"`. A bare `"0"` is
//! the only unit-less value allowed. Signs other than a leading `+` are
//! rejected, since a negative idle period has no meaning.

use std::time::Duration;

use affinity_common::errors::{AffinityError, AffinityResult};

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parse duration text such as `"5s"` or `"1h15m"`
pub fn parse_duration(input: &str) -> AffinityResult<Duration> {
    let text = input.trim();
    let text = text.strip_prefix('+').unwrap_or(text);

    if text.is_empty() {
        return Err(AffinityError::parse("empty duration", input));
    }
    if text.starts_with('-') {
        return Err(AffinityError::parse("negative duration", input));
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = text;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after) = rest.split_at(number_len);

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(AffinityError::parse("expected a number", input));
        }
        if fraction.contains('.') {
            return Err(AffinityError::parse("malformed number", input));
        }

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, next) = after.split_at(unit_len);
        if unit.is_empty() {
            return Err(AffinityError::parse(
                format!("missing unit after \"{}\"", number),
                input,
            ));
        }
        let scale = unit_nanos(unit)
            .ok_or_else(|| AffinityError::parse(format!("unknown unit \"{}\"", unit), input))?;

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AffinityError::parse("duration out of range", input))?
        };
        let mut nanos = whole_value
            .checked_mul(scale)
            .ok_or_else(|| AffinityError::parse("duration out of range", input))?;

        if !fraction.is_empty() {
            // Digits past nanosecond precision cannot change the result
            let digits = &fraction[..fraction.len().min(18)];
            let numerator: u128 = digits
                .parse()
                .map_err(|_| AffinityError::parse("malformed number", input))?;
            let denominator = 10u128.pow(digits.len() as u32);
            nanos = nanos
                .checked_add(numerator * scale / denominator)
                .ok_or_else(|| AffinityError::parse("duration out of range", input))?;
        }

        total = total
            .checked_add(nanos)
            .filter(|t| *t <= u64::MAX as u128)
            .ok_or_else(|| AffinityError::parse("duration out of range", input))?;
        rest = next;
    }

    Ok(Duration::from_nanos(total as u64))
}
