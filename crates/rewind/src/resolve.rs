//! Resolution of parsed moment values into concrete rewind moments.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{RewindError, RewindResult};
use crate::moment::{self, MomentExpression, MomentKeyword, MomentOperator, MomentValue};
use crate::playback::{Playback, RewindInterval, RewindMoment};
use crate::segment::SegmentMetadata;

/// Reference points used while resolving the moments of one request.
///
/// `head` is the most recent segment available upstream, probed once at
/// context creation. `reference` anchors relative searches; it defaults to
/// the head but callers may thread a previously located segment through to
/// shrink jump counts. `pinned_time` fixes the reading of `now`: batch modes
/// set it to their start-up time so long jobs stay self-consistent, while
/// serving resolves `now` from the head, memoized per context.
pub struct LocateContext {
    pub head: SegmentMetadata,
    pub reference: SegmentMetadata,
    pub pinned_time: Option<DateTime<Utc>>,
    pinned_moment: Option<RewindMoment>,
}

impl LocateContext {
    pub async fn new(
        playback: &Playback,
        reference: Option<SegmentMetadata>,
        pinned_time: Option<DateTime<Utc>>,
    ) -> RewindResult<Self> {
        let head = playback.head_metadata().await?;

        if let Some(pinned) = pinned_time {
            tracing::info!(time = %pinned, "pinned time");
        }

        Ok(Self {
            head,
            reference: reference.unwrap_or(head),
            pinned_time,
            pinned_moment: None,
        })
    }
}

/// Resolved details of a located interval, for reporting and file naming.
#[derive(Debug, Clone)]
pub struct LocateOutput {
    pub id: String,
    pub title: String,
    pub start_sequence_number: u64,
    pub end_sequence_number: u64,
    pub actual_start_time: DateTime<Utc>,
    pub actual_end_time: DateTime<Utc>,
    pub actual_duration: TimeDelta,
    pub input_start_time: DateTime<Utc>,
    pub input_end_time: DateTime<Utc>,
    pub input_duration: TimeDelta,
}

/// Locates a single moment.
pub async fn locate_moment(
    playback: &Playback,
    value: &MomentValue,
    context: &mut LocateContext,
) -> RewindResult<RewindMoment> {
    resolve_moment(playback, value, context, false)
        .await
        .map_err(|e| wrap("start", value, e))
}

/// Locates the start and end moments of an interval.
pub async fn locate_interval(
    playback: &Playback,
    start: &MomentValue,
    end: &MomentValue,
    context: &mut LocateContext,
) -> RewindResult<(RewindInterval, LocateOutput)> {
    tracing::info!(%start, %end, "locating interval");

    validate_moments(start, end, context)?;

    let interval = locate_start_and_end(playback, start, end, context).await?;

    let info = playback.info();
    let output = LocateOutput {
        id: info.id.clone(),
        title: info.title.clone(),
        start_sequence_number: interval.start.metadata.sequence_number,
        end_sequence_number: interval.end.metadata.sequence_number,
        actual_start_time: interval.start.actual_time,
        actual_end_time: interval.end.actual_time,
        actual_duration: interval.end.actual_time - interval.start.actual_time,
        input_start_time: interval.start.target_time,
        input_end_time: interval.end.target_time,
        input_duration: interval.end.target_time - interval.start.target_time,
    };

    Ok((interval, output))
}

fn validate_moments(
    start: &MomentValue,
    end: &MomentValue,
    context: &LocateContext,
) -> RewindResult<()> {
    moment::validate_values(start, end)?;

    match start {
        MomentValue::Time(t) if *t > context.head.end_time() => {
            Err(RewindError::TimeAfterHead(*t))
        }
        MomentValue::Sequence(sq) if *sq > context.head.sequence_number => {
            Err(RewindError::SequenceAfterHead {
                sq: *sq,
                head: context.head.sequence_number,
            })
        }
        _ => Ok(()),
    }
}

async fn locate_start_and_end(
    playback: &Playback,
    start: &MomentValue,
    end: &MomentValue,
    context: &mut LocateContext,
) -> RewindResult<RewindInterval> {
    if let MomentValue::Duration(start_duration) = start {
        // Durations anchor on the opposite endpoint; two durations were
        // already rejected by validation.
        let end_moment = resolve_moment(playback, end, context, true)
            .await
            .map_err(|e| wrap("end", end, e))?;
        let start_time = end_moment.target_time - *start_duration;
        let start_moment = playback
            .locate_moment(start_time, context.reference, false)
            .await?;
        return Ok(RewindInterval {
            start: start_moment,
            end: end_moment,
        });
    }

    let start_moment = resolve_moment(playback, start, context, false)
        .await
        .map_err(|e| wrap("start", start, e))?;

    if let MomentValue::Duration(end_duration) = end {
        let end_time = start_moment.target_time + *end_duration;
        let end_moment = playback
            .locate_moment(end_time, context.reference, true)
            .await?;
        return Ok(RewindInterval {
            start: start_moment,
            end: end_moment,
        });
    }

    let end_moment = resolve_moment(playback, end, context, true)
        .await
        .map_err(|e| wrap("end", end, e))?;

    if start_moment.target_time > end_moment.actual_time {
        return Err(wrap("start", start, RewindError::StartAfterEnd));
    }

    Ok(RewindInterval {
        start: start_moment,
        end: end_moment,
    })
}

async fn resolve_moment(
    playback: &Playback,
    value: &MomentValue,
    context: &mut LocateContext,
    is_end: bool,
) -> RewindResult<RewindMoment> {
    match value {
        MomentValue::Time(t) => resolve_time(playback, *t, context, is_end).await,
        MomentValue::Sequence(sq) => resolve_sequence(playback, *sq, context, is_end).await,
        MomentValue::Keyword(keyword) => resolve_keyword(playback, *keyword, context, is_end).await,
        MomentValue::Expression(expression) => {
            resolve_expression(playback, expression, context, is_end).await
        }
        MomentValue::Duration(_) => Err(RewindError::BadMomentType("bare duration")),
    }
}

async fn resolve_time(
    playback: &Playback,
    time: DateTime<Utc>,
    context: &mut LocateContext,
    is_end: bool,
) -> RewindResult<RewindMoment> {
    if time > context.head.end_time() {
        return Err(RewindError::TimeAfterHead(time));
    }
    playback
        .locate_moment(time, context.reference, is_end)
        .await
}

async fn resolve_sequence(
    playback: &Playback,
    sq: u64,
    context: &mut LocateContext,
    is_end: bool,
) -> RewindResult<RewindMoment> {
    if sq > context.head.sequence_number {
        return Err(RewindError::SequenceAfterHead {
            sq,
            head: context.head.sequence_number,
        });
    }

    let metadata = playback
        .fetch_segment_metadata(playback.probe_itag(), sq)
        .await?;

    let target_time = if is_end {
        metadata.end_time()
    } else {
        metadata.time()
    };

    Ok(RewindMoment::new(target_time, metadata, is_end, false))
}

async fn resolve_keyword(
    playback: &Playback,
    keyword: MomentKeyword,
    context: &mut LocateContext,
    is_end: bool,
) -> RewindResult<RewindMoment> {
    match keyword {
        MomentKeyword::Now => {
            if let Some(pinned) = context.pinned_moment {
                return Ok(pinned);
            }

            let moment = match context.pinned_time {
                Some(pinned_time) => {
                    resolve_time(playback, pinned_time, context, is_end).await?
                }
                // Without a pinned time, `now` reads as the end of the most
                // recent segment.
                None => RewindMoment::new(context.head.end_time(), context.head, is_end, false),
            };
            context.pinned_moment = Some(moment);

            tracing::debug!(
                sq = moment.metadata.sequence_number,
                time = %moment.target_time,
                "resolved now keyword"
            );

            Ok(moment)
        }
        MomentKeyword::Earliest => {
            Err(RewindError::UnsupportedKeyword("earliest".to_string()))
        }
    }
}

async fn resolve_expression(
    playback: &Playback,
    expression: &MomentExpression,
    context: &mut LocateContext,
    is_end: bool,
) -> RewindResult<RewindMoment> {
    let left_time = match expression.left.as_ref() {
        MomentValue::Keyword(MomentKeyword::Now) => {
            if expression.operator == MomentOperator::Plus {
                return Err(moment::MomentParseError::NowPlus.into());
            }
            resolve_keyword(playback, MomentKeyword::Now, context, false)
                .await?
                .target_time
        }
        MomentValue::Time(t) => *t,
        MomentValue::Sequence(sq) => {
            resolve_sequence(playback, *sq, context, false)
                .await?
                .target_time
        }
        other => {
            return Err(RewindError::ResolveMoment {
                position: "left",
                moment: other.to_string(),
                source: Box::new(RewindError::BadMomentType("expression operand")),
            })
        }
    };

    let target_time = match expression.operator {
        MomentOperator::Plus => left_time + expression.right,
        MomentOperator::Minus => left_time - expression.right,
    };

    resolve_time(playback, target_time, context, is_end).await
}

fn wrap(position: &'static str, value: &MomentValue, source: RewindError) -> RewindError {
    RewindError::ResolveMoment {
        position,
        moment: value.to_string(),
        source: Box::new(source),
    }
}
