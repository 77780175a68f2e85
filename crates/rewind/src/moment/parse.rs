//! Grammar for interval and moment inputs.
//!
//! An interval is two parts separated by `/` or `--`. Each part is one of an
//! absolute date-time, a unix timestamp (`@1767349230`), a duration
//! (`1d2h3m4s`), a sequence number, the keywords `now`/`earliest`, or a
//! `point ± duration` expression. Date-times without an explicit offset are
//! interpreted in the host's local zone.

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc,
};

use super::{MomentExpression, MomentKeyword, MomentOperator, MomentParseError, MomentValue};

const NOW_KEYWORD: &str = "now";
const EARLIEST_KEYWORD: &str = "earliest";

/// Parses a full interval, e.g. `2026-01-02T10:20/now` or `7959599--1h`.
///
/// Besides the grammar itself, positions that can never be valid are
/// rejected here: `now` as start, `earliest` as end and double-duration
/// intervals.
pub fn parse_interval(input: &str) -> Result<(MomentValue, MomentValue), MomentParseError> {
    let (start_input, end_input) = split_interval(input)?;
    let start = parse_interval_part(start_input)?;
    let end = parse_interval_part(end_input)?;

    if start == MomentValue::Keyword(MomentKeyword::Now) {
        return Err(MomentParseError::NowAtStart);
    }
    if end == MomentValue::Keyword(MomentKeyword::Earliest) {
        return Err(MomentParseError::EarliestAtEnd);
    }
    if start.is_duration() && end.is_duration() {
        return Err(MomentParseError::TwoDurations);
    }

    Ok((start, end))
}

/// Parses a single interval operand. Trailing garbage is an error.
pub fn parse_interval_part(input: &str) -> Result<MomentValue, MomentParseError> {
    if let Some(value) = scan_expression(input)? {
        return Ok(value);
    }
    if let Some((time, rest)) = scan_datetime(input) {
        if rest.is_empty() {
            return Ok(MomentValue::Time(time));
        }
    }
    if let Some((duration, rest)) = scan_duration(input) {
        if rest.is_empty() {
            return Ok(MomentValue::Duration(duration));
        }
    }
    if let Some((time, rest)) = scan_unix(input) {
        if rest.is_empty() {
            return Ok(MomentValue::Time(time));
        }
    }
    if input == NOW_KEYWORD {
        return Ok(MomentValue::Keyword(MomentKeyword::Now));
    }
    if input == EARLIEST_KEYWORD {
        return Ok(MomentValue::Keyword(MomentKeyword::Earliest));
    }
    if let Some((sq, rest)) = scan_sequence(input) {
        if rest.is_empty() {
            return Ok(MomentValue::Sequence(sq));
        }
    }

    Err(MomentParseError::Invalid {
        input: input.to_string(),
        expected: "moment",
    })
}

fn split_interval(input: &str) -> Result<(&str, &str), MomentParseError> {
    if let Some(index) = input.find('/') {
        return Ok((&input[..index], &input[index + 1..]));
    }
    if let Some(index) = input.find("--") {
        return Ok((&input[..index], &input[index + 2..]));
    }
    Err(MomentParseError::MissingSeparator)
}

/// Scans a `point ± duration` expression. Whitespace around the operator is
/// optional. Returns `Ok(None)` when the input is not an expression at all;
/// an expression that is recognized but disallowed (`now + ...`) is an error.
fn scan_expression(input: &str) -> Result<Option<MomentValue>, MomentParseError> {
    let (left, rest) = if let Some((time, rest)) = scan_datetime(input) {
        (MomentValue::Time(time), rest)
    } else if let Some((time, rest)) = scan_unix(input) {
        (MomentValue::Time(time), rest)
    } else if let Some(rest) = input.strip_prefix(NOW_KEYWORD) {
        (MomentValue::Keyword(MomentKeyword::Now), rest)
    } else if let Some((sq, rest)) = scan_sequence(input) {
        (MomentValue::Sequence(sq), rest)
    } else {
        return Ok(None);
    };

    let rest = rest.trim_start();
    let operator = match rest.chars().next() {
        Some('+') => MomentOperator::Plus,
        Some('-') => MomentOperator::Minus,
        _ => return Ok(None),
    };
    let rest = rest[1..].trim_start();

    let Some((duration, rest)) = scan_duration(rest) else {
        return Ok(None);
    };
    if !rest.is_empty() {
        return Ok(None);
    }

    if left == MomentValue::Keyword(MomentKeyword::Now) && operator == MomentOperator::Plus {
        return Err(MomentParseError::NowPlus);
    }

    Ok(Some(MomentValue::Expression(MomentExpression {
        left: Box::new(left),
        operator,
        right: duration,
    })))
}

/// Scans `date ('T' time)? offset?`, `date offset?` or `time offset?`.
/// A time without a date is combined with the current local date.
fn scan_datetime(input: &str) -> Option<(DateTime<Utc>, &str)> {
    if let Some((date, rest)) = scan_date(input) {
        if let Some(time_input) = rest.strip_prefix('T') {
            if let Some((time, rest)) = scan_time(time_input) {
                return apply_offset(date.and_time(time), rest);
            }
        }
        return apply_offset(date.and_time(NaiveTime::MIN), rest);
    }

    let (time, rest) = scan_time(input)?;
    let today = Local::now().date_naive();
    apply_offset(today.and_time(time), rest)
}

fn scan_date(input: &str) -> Option<(NaiveDate, &str)> {
    let (year, rest) = take_digits(input, 4)?;
    let rest = rest.strip_prefix('-')?;
    let (month, rest) = take_digits(rest, 2)?;
    let rest = rest.strip_prefix('-')?;
    let (day, rest) = take_digits(rest, 2)?;
    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    Some((date, rest))
}

fn scan_time(input: &str) -> Option<(NaiveTime, &str)> {
    let (hours, rest) = take_digits(input, 2)?;
    let rest = rest.strip_prefix(':')?;
    let (minutes, rest) = take_digits(rest, 2)?;
    let (seconds, rest) = match rest.strip_prefix(':').and_then(|r| take_digits(r, 2)) {
        Some((seconds, rest)) => (seconds, rest),
        None => (0, rest),
    };
    let time = NaiveTime::from_hms_opt(hours, minutes, seconds)?;
    Some((time, rest))
}

/// Interprets a naive date-time in the zone given by the trailing offset,
/// falling back to the host's local zone, and normalizes to UTC.
fn apply_offset(naive: NaiveDateTime, input: &str) -> Option<(DateTime<Utc>, &str)> {
    if let Some(rest) = input.strip_prefix('Z') {
        return Some((Utc.from_utc_datetime(&naive), rest));
    }
    if let Some((offset_seconds, rest)) = scan_offset(input) {
        let offset = FixedOffset::east_opt(offset_seconds)?;
        let time = offset.from_local_datetime(&naive).earliest()?;
        return Some((time.with_timezone(&Utc), rest));
    }
    let time = Local.from_local_datetime(&naive).earliest()?;
    Some((time.with_timezone(&Utc), input))
}

/// Scans `('+'|'-') HH (':'? MM)?` into an offset in seconds.
fn scan_offset(input: &str) -> Option<(i32, &str)> {
    let (sign, rest) = match input.chars().next() {
        Some('+') => (1, &input[1..]),
        Some('-') => (-1, &input[1..]),
        _ => return None,
    };
    let (hours, rest) = take_digits(rest, 2)?;
    let (minutes, rest) = match rest.strip_prefix(':') {
        Some(after_colon) => match take_digits(after_colon, 2) {
            Some((minutes, rest)) => (minutes, rest),
            // A colon not followed by two digits is not part of the offset.
            None => (0, rest),
        },
        None => match take_digits(rest, 2) {
            Some((minutes, rest)) => (minutes, rest),
            None => (0, rest),
        },
    };
    Some((sign * (hours as i32 * 3600 + minutes as i32 * 60), rest))
}

fn scan_unix(input: &str) -> Option<(DateTime<Utc>, &str)> {
    let rest = input.strip_prefix('@')?;
    let (digits, rest) = scan_digits(rest)?;
    let seconds = digits.parse::<i64>().ok()?;
    let time = DateTime::from_timestamp(seconds, 0)?;
    Some((time, rest))
}

/// Scans `[Nd][Nh][Nm][Ns]` with the components in that order. A duration
/// that matches nothing, or only zero-valued components, is not a duration.
fn scan_duration(input: &str) -> Option<(TimeDelta, &str)> {
    let mut rest = input;
    let mut total_seconds: i64 = 0;

    for (suffix, unit_seconds) in [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        if let Some((digits, after_digits)) = scan_digits(rest) {
            if let Some(after_suffix) = after_digits.strip_prefix(suffix) {
                let value = digits.parse::<i64>().ok()?;
                total_seconds = total_seconds.checked_add(value.checked_mul(unit_seconds)?)?;
                rest = after_suffix;
            }
        }
    }

    if total_seconds == 0 {
        return None;
    }
    Some((TimeDelta::try_seconds(total_seconds)?, rest))
}

fn scan_sequence(input: &str) -> Option<(u64, &str)> {
    let (digits, rest) = scan_digits(input)?;
    let sq = digits.parse::<u64>().ok()?;
    Some((sq, rest))
}

fn scan_digits(input: &str) -> Option<(&str, &str)> {
    let end = input
        .as_bytes()
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    Some(input.split_at(end))
}

fn take_digits(input: &str, count: usize) -> Option<(u32, &str)> {
    if input.len() < count || !input.as_bytes()[..count].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let (digits, rest) = input.split_at(count);
    Some((digits.parse().ok()?, rest))
}
