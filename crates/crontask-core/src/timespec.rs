//! Time specifications accepted by task creation.
//!
//! A spec is either absolute (`1700000000`, `2026-01-01T00:00:00Z`) or an
//! offset from a base time written as `+<duration>` (`+90s`, `+1h30m`,
//! `+1.5h`).

use chrono::DateTime;

use crate::error::{CoreError, Result};
use crate::types::Timestamp;

const NANOS_PER_SEC: i128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Absolute(Timestamp),
    /// Offset in nanoseconds from whatever base the caller resolves against.
    Relative(i64),
}

impl TimeSpec {
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if let Some(rest) = s.strip_prefix('+') {
            return parse_duration(rest)
                .map(TimeSpec::Relative)
                .map_err(|reason| {
                    CoreError::InvalidTimeFormat(format!(
                        "{input}: {reason}, expected a duration like +1h30m"
                    ))
                });
        }
        if let Ok(ts) = s.parse::<i64>() {
            return Ok(TimeSpec::Absolute(ts));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(TimeSpec::Absolute(dt.timestamp()));
        }
        Err(CoreError::InvalidTimeFormat(format!(
            "{input}: expected a unix timestamp, an RFC 3339 time or +duration"
        )))
    }

    /// Turns the spec into whole seconds. Relative offsets are added to
    /// `base` and the sub-second remainder is floored away.
    pub fn resolve(self, base: Timestamp) -> Result<Timestamp> {
        match self {
            TimeSpec::Absolute(ts) => Ok(ts),
            TimeSpec::Relative(nanos) => {
                let total = i128::from(base) * NANOS_PER_SEC + i128::from(nanos);
                Timestamp::try_from(total.div_euclid(NANOS_PER_SEC)).map_err(|_| {
                    CoreError::InvalidTimeFormat(format!("offset {nanos}ns overflows"))
                })
            }
        }
    }
}

/// Parses a signed sequence of `<decimal><unit>` pairs into nanoseconds.
fn parse_duration(s: &str) -> std::result::Result<i64, String> {
    let (negative, mut rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err("empty duration".into());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_end);

        let (frac_part, after_num) = match after_int.strip_prefix('.') {
            Some(tail) => {
                let end = tail
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(tail.len());
                tail.split_at(end)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("missing number before '{after_num}'"));
        }

        let unit_end = after_num
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after_num.len());
        let (unit, tail) = after_num.split_at(unit_end);
        let scale = unit_nanos(unit).ok_or_else(|| {
            if unit.is_empty() {
                "missing unit".to_string()
            } else {
                format!("unknown unit '{unit}'")
            }
        })?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| "number too large".to_string())?
        };
        let mut value = whole
            .checked_mul(scale)
            .ok_or_else(|| "duration overflows".to_string())?;

        let mut place = scale;
        for digit in frac_part.bytes() {
            place /= 10;
            if place == 0 {
                break;
            }
            value += u128::from(digit - b'0') * place;
        }

        total = total
            .checked_add(value)
            .ok_or_else(|| "duration overflows".to_string())?;
        rest = tail;
    }

    let nanos = i64::try_from(total).map_err(|_| "duration overflows".to_string())?;
    Ok(if negative { -nanos } else { nanos })
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}
