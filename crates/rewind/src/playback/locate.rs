//! Segment search for a target time.
//!
//! The search runs in three steps: a jump-based probe that either lands on
//! the segment directly or outlines a search domain (the jump length is the
//! time difference divided by the nominal segment duration), a binary
//! search inside the outlined domain, and a final check whether the target
//! falls into a gap of the timeline rather than into a segment.
//!
//! All three steps are needed for accurate results: a stream timeline may
//! contain numerous gaps, so a single proportional jump can over- or
//! undershoot, and comparisons have to absorb the jitter of ingestion
//! walltimes.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{RewindError, RewindResult};
use crate::segment::SegmentMetadata;

use super::Playback;

/// Absolute tolerance applied when a time difference is compared against a
/// segment duration.
const TIME_DIFF_TOLERANCE_MS: i64 = 50;

/// Upper bound on jump steps before the search is declared lost.
const MAX_JUMP_STEPS: usize = 10;

fn tolerance() -> TimeDelta {
    TimeDelta::milliseconds(TIME_DIFF_TOLERANCE_MS)
}

/// A point in time resolved to a concrete segment.
///
/// `actual_time` is the start of the segment for a start-side moment and
/// its end for an end-side moment; `target_time` keeps what was asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewindMoment {
    pub metadata: SegmentMetadata,
    pub actual_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub in_gap: bool,
}

impl RewindMoment {
    pub fn new(
        target_time: DateTime<Utc>,
        metadata: SegmentMetadata,
        is_end: bool,
        in_gap: bool,
    ) -> Self {
        let actual_time = if is_end {
            metadata.end_time()
        } else {
            metadata.time()
        };
        Self {
            metadata,
            actual_time,
            target_time,
            in_gap,
        }
    }

    pub fn time_difference(&self) -> TimeDelta {
        self.target_time - self.actual_time
    }
}

/// Start and end moments of a contiguous playback span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewindInterval {
    pub start: RewindMoment,
    pub end: RewindMoment,
}

impl RewindInterval {
    pub fn duration(&self) -> TimeDelta {
        self.end.actual_time - self.start.actual_time
    }

    pub fn segment_count(&self) -> u64 {
        self.end.metadata.sequence_number - self.start.metadata.sequence_number + 1
    }
}

impl Playback {
    /// Finds the `RewindMoment` corresponding to a target time.
    ///
    /// The search runs relative to an arbitrary reference segment. Usually
    /// the choice comes down to the head segment, but the closest known
    /// segment to the target is preferable since it shrinks the number of
    /// jumps. If `is_end` is true the moment is treated as an interval end:
    /// a segment then covers `(walltime, walltime + duration]` instead of
    /// `[walltime, walltime + duration)`.
    pub async fn locate_moment(
        &self,
        target_time: DateTime<Utc>,
        reference: SegmentMetadata,
        is_end: bool,
    ) -> RewindResult<RewindMoment> {
        tracing::info!(
            target = %target_time,
            reference_sq = reference.sequence_number,
            reference_time = %reference.time(),
            "locating moment"
        );

        let segment_duration = self.info().segment_duration;
        let mut track = Vec::new();

        let mut candidate_sq = reference.sequence_number;
        let mut candidate = self
            .fetch_segment_metadata(self.probe_itag(), candidate_sq)
            .await?;
        let mut diff = target_time - reference.time();
        let start_direction = direction_of(diff);
        let mut sign_changed = false;

        for _ in 0..MAX_JUMP_STEPS {
            track.push(candidate_sq);
            tracing::debug!(
                sq = candidate_sq,
                diff_us = diff.num_microseconds().unwrap_or_default(),
                time = %candidate.time(),
                "jump search step"
            );

            if hit_test(diff, candidate.duration, is_end) {
                return Ok(RewindMoment::new(target_time, candidate, is_end, false));
            }

            let direction = direction_of(diff);
            if !sign_changed {
                sign_changed = direction * start_direction < 0;
            }
            if sign_changed && direction == start_direction {
                // The probes crossed the target and came back: the last two
                // probed sequences bracket it.
                let previous_sq = track[track.len() - 2];
                return self
                    .search_in_range(target_time, previous_sq, candidate_sq, is_end)
                    .await;
            }

            let offset = jump_offset(diff, segment_duration, is_end);
            candidate_sq = candidate_sq.saturating_add_signed(offset);
            candidate = self
                .fetch_segment_metadata(self.probe_itag(), candidate_sq)
                .await?;
            diff = target_time - candidate.time();
        }

        Err(RewindError::JumpBudgetExhausted {
            limit: MAX_JUMP_STEPS,
            track,
        })
    }

    /// Binary search within an outlined domain, followed by the gap check.
    async fn search_in_range(
        &self,
        target_time: DateTime<Utc>,
        start_sq: u64,
        end_sq: u64,
        is_end: bool,
    ) -> RewindResult<RewindMoment> {
        let (mut low, mut high) = (start_sq.min(end_sq), start_sq.max(end_sq));
        tracing::debug!(low, high, "bisecting search domain");

        // Smallest sequence in the domain whose walltime is at or past the
        // target; the segment before it is the candidate.
        let mut first_at_or_past = high + 1;
        while low <= high {
            let middle = low + (high - low) / 2;
            let metadata = self
                .fetch_segment_metadata(self.probe_itag(), middle)
                .await?;
            tracing::debug!(
                sq = middle,
                diff_us = (target_time - metadata.time()).num_microseconds().unwrap_or_default(),
                "bisect step"
            );
            if metadata.time() >= target_time {
                first_at_or_past = middle;
                if middle == 0 {
                    break;
                }
                high = middle - 1;
            } else {
                low = middle + 1;
            }
        }

        let mut candidate_sq = first_at_or_past.saturating_sub(1);
        let mut candidate = self
            .fetch_segment_metadata(self.probe_itag(), candidate_sq)
            .await?;
        // The difference is non-negative from here on.
        let mut diff = target_time - candidate.time();

        let mut in_gap = false;
        if candidate.duration < diff - tolerance() {
            tracing::info!("target time falls inside a gap");
            in_gap = true;
            if !is_end {
                // A start inside a gap attaches to the segment after it.
                candidate_sq += 1;
                candidate = self
                    .fetch_segment_metadata(self.probe_itag(), candidate_sq)
                    .await?;
                diff = target_time - candidate.time();
                tracing::debug!(
                    sq = candidate_sq,
                    diff_us = diff.num_microseconds().unwrap_or_default(),
                    "took next segment"
                );
            }
        }

        Ok(RewindMoment::new(target_time, candidate, is_end, in_gap))
    }
}

fn direction_of(diff: TimeDelta) -> i64 {
    if diff < TimeDelta::zero() {
        -1
    } else {
        1
    }
}

/// Whether a time difference to a segment's walltime lands inside that
/// segment. The lower edge belongs to the segment on the start side and to
/// the preceding one on the end side.
fn hit_test(diff: TimeDelta, duration: TimeDelta, is_end: bool) -> bool {
    let past_lower_edge = if is_end {
        diff > TimeDelta::zero()
    } else {
        diff >= TimeDelta::zero()
    };
    past_lower_edge && diff <= duration + tolerance()
}

/// Number of segments to jump over, from the time difference and the
/// nominal segment duration. Floored division keeps the landing point at or
/// before the target; an exact multiple moves one further back on the end
/// side so that boundary instants attach to the preceding segment.
fn jump_offset(diff: TimeDelta, segment_duration: TimeDelta, is_end: bool) -> i64 {
    let diff_us = diff
        .num_microseconds()
        .unwrap_or(if diff < TimeDelta::zero() {
            i64::MIN / 2
        } else {
            i64::MAX / 2
        });
    let duration_us = segment_duration.num_microseconds().unwrap_or(0).max(1);

    let mut offset = diff_us.div_euclid(duration_us);
    if is_end && diff_us.rem_euclid(duration_us) == 0 {
        offset -= 1;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_us(us: i64) -> TimeDelta {
        TimeDelta::microseconds(us)
    }

    #[test]
    fn test_hit_test_edges() {
        let duration = delta_us(2_000_000);

        assert!(hit_test(TimeDelta::zero(), duration, false));
        assert!(!hit_test(TimeDelta::zero(), duration, true));
        assert!(hit_test(delta_us(1), duration, true));
        assert!(hit_test(delta_us(2_000_000), duration, false));
        assert!(hit_test(delta_us(2_049_999), duration, false));
        assert!(!hit_test(delta_us(2_050_001), duration, false));
        assert!(!hit_test(delta_us(-1), duration, false));
    }

    #[test]
    fn test_jump_offset() {
        let duration = delta_us(2_000_000);

        assert_eq!(jump_offset(delta_us(7_000_000), duration, false), 3);
        assert_eq!(jump_offset(delta_us(-7_000_000), duration, false), -4);
        assert_eq!(jump_offset(delta_us(-6_000_000), duration, false), -3);
        assert_eq!(jump_offset(delta_us(6_000_000), duration, false), 3);

        // Exact multiples move one further back on the end side.
        assert_eq!(jump_offset(TimeDelta::zero(), duration, true), -1);
        assert_eq!(jump_offset(delta_us(-6_000_000), duration, true), -4);
        assert_eq!(jump_offset(delta_us(6_000_000), duration, true), 2);
        assert_eq!(jump_offset(delta_us(6_000_001), duration, true), 3);
    }
}
