use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

mod parse;

pub use parse::{parse_interval, parse_interval_part};

/// A single operand of a rewind interval, as written by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum MomentValue {
    /// An absolute instant, normalized to UTC.
    Time(DateTime<Utc>),
    /// A segment sequence number.
    Sequence(u64),
    /// A relative length of time, e.g. `1h30m`.
    Duration(TimeDelta),
    Keyword(MomentKeyword),
    Expression(MomentExpression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentKeyword {
    Now,
    Earliest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentOperator {
    Plus,
    Minus,
}

/// A `point ± duration` expression, e.g. `now - 1h` or `@1767349230 + 30s`.
///
/// The left operand is restricted by the grammar to a time, a unix
/// timestamp, a sequence number or the `now` keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentExpression {
    pub left: Box<MomentValue>,
    pub operator: MomentOperator,
    pub right: TimeDelta,
}

impl MomentValue {
    pub fn is_duration(&self) -> bool {
        matches!(self, MomentValue::Duration(_))
    }

    /// Whether the value designates an absolute point on the timeline.
    pub fn is_absolute(&self) -> bool {
        !self.is_duration()
    }
}

impl fmt::Display for MomentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MomentValue::Time(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%SZ")),
            MomentValue::Sequence(sq) => write!(f, "{sq}"),
            MomentValue::Duration(d) => write!(f, "{}", crate::util::path::format_duration(*d)),
            MomentValue::Keyword(MomentKeyword::Now) => write!(f, "now"),
            MomentValue::Keyword(MomentKeyword::Earliest) => write!(f, "earliest"),
            MomentValue::Expression(expr) => {
                let op = match expr.operator {
                    MomentOperator::Plus => '+',
                    MomentOperator::Minus => '-',
                };
                write!(
                    f,
                    "{} {} {}",
                    expr.left,
                    op,
                    crate::util::path::format_duration(expr.right)
                )
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MomentParseError {
    #[error("invalid {expected}: '{input}'")]
    Invalid {
        input: String,
        expected: &'static str,
    },

    #[error("missing interval separator ('/' or '--')")]
    MissingSeparator,

    #[error("keyword 'now' cannot be used as start")]
    NowAtStart,

    #[error("keyword 'earliest' cannot be used at end")]
    EarliestAtEnd,

    #[error("both start and end cannot be durations")]
    TwoDurations,

    #[error("'now' cannot be used with plus")]
    NowPlus,

    #[error("start time is after end time: {start} > {end}")]
    StartTimeAfterEnd {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("start segment is after end segment: {start} > {end}")]
    StartSequenceAfterEnd { start: u64, end: u64 },
}

/// Preliminary validation of parsed start and end values, catching obvious
/// errors before any moment is located.
pub fn validate_values(start: &MomentValue, end: &MomentValue) -> Result<(), MomentParseError> {
    match (start, end) {
        (MomentValue::Time(s), MomentValue::Time(e)) if s > e => {
            Err(MomentParseError::StartTimeAfterEnd { start: *s, end: *e })
        }
        (MomentValue::Sequence(s), MomentValue::Sequence(e)) if s > e => {
            Err(MomentParseError::StartSequenceAfterEnd { start: *s, end: *e })
        }
        (MomentValue::Duration(_), MomentValue::Duration(_)) => {
            Err(MomentParseError::TwoDurations)
        }
        (MomentValue::Keyword(MomentKeyword::Now), _) => Err(MomentParseError::NowAtStart),
        _ => Ok(()),
    }
}
