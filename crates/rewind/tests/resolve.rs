mod common;

use chrono::{DateTime, TimeDelta, Utc};

use common::{uniform_timeline, MockUpstream, SEGMENT_DURATION_US};
use rewind::moment::{self, MomentKeyword, MomentParseError, MomentValue};
use rewind::resolve::{self, LocateContext};
use rewind::{Playback, RewindError};

const BASE_US: i64 = 1_700_000_000_000_000;

fn at(walltime_us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(walltime_us).unwrap()
}

fn walltime(sq: u64) -> DateTime<Utc> {
    at(BASE_US + (sq - 1000) as i64 * SEGMENT_DURATION_US)
}

async fn start_playback() -> Playback {
    let timeline = uniform_timeline(1000..=1100, BASE_US);
    let (playback, _) = common::start_playback(MockUpstream::new(timeline, 1100)).await;
    playback
}

#[tokio::test]
async fn test_interval_of_two_sequences() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let (interval, output) = resolve::locate_interval(
        &playback,
        &MomentValue::Sequence(1010),
        &MomentValue::Sequence(1020),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(interval.start.metadata.sequence_number, 1010);
    assert_eq!(interval.start.target_time, walltime(1010));
    assert_eq!(interval.start.actual_time, walltime(1010));
    assert_eq!(interval.end.metadata.sequence_number, 1020);
    assert_eq!(interval.end.actual_time, walltime(1021));
    assert_eq!(interval.segment_count(), 11);

    assert_eq!(output.id, common::TEST_VIDEO_ID);
    assert_eq!(output.start_sequence_number, 1010);
    assert_eq!(output.end_sequence_number, 1020);
    assert_eq!(output.actual_duration, TimeDelta::seconds(22));
}

#[tokio::test]
async fn test_interval_of_time_and_duration() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let start_time = walltime(1010) + TimeDelta::seconds(1);
    let (interval, _) = resolve::locate_interval(
        &playback,
        &MomentValue::Time(start_time),
        &MomentValue::Duration(TimeDelta::seconds(30)),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(interval.start.metadata.sequence_number, 1010);
    assert_eq!(interval.end.metadata.sequence_number, 1025);
    assert_eq!(interval.end.target_time, start_time + TimeDelta::seconds(30));
}

#[tokio::test]
async fn test_interval_of_duration_and_time() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let (interval, _) = resolve::locate_interval(
        &playback,
        &MomentValue::Duration(TimeDelta::seconds(60)),
        &MomentValue::Time(walltime(1050)),
        &mut context,
    )
    .await
    .unwrap();

    // The end boundary instant belongs to the preceding segment; the start
    // anchors one minute earlier.
    assert_eq!(interval.end.metadata.sequence_number, 1049);
    assert_eq!(interval.end.actual_time, walltime(1050));
    assert_eq!(interval.start.metadata.sequence_number, 1020);
    assert_eq!(interval.start.target_time, walltime(1020));
}

#[tokio::test]
async fn test_interval_validation() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let err = resolve::locate_interval(
        &playback,
        &MomentValue::Time(walltime(1050)),
        &MomentValue::Time(walltime(1010)),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        RewindError::Parse(MomentParseError::StartTimeAfterEnd { .. })
    ));

    let err = resolve::locate_interval(
        &playback,
        &MomentValue::Duration(TimeDelta::seconds(10)),
        &MomentValue::Duration(TimeDelta::seconds(20)),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        RewindError::Parse(MomentParseError::TwoDurations)
    ));
}

#[tokio::test]
async fn test_moments_after_head_are_rejected() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    // Head is sq 1100; its end time caps the reachable timeline.
    let err = resolve::locate_interval(
        &playback,
        &MomentValue::Time(walltime(1100) + TimeDelta::seconds(10)),
        &MomentValue::Keyword(MomentKeyword::Now),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RewindError::TimeAfterHead(_)), "{err}");

    let err = resolve::locate_interval(
        &playback,
        &MomentValue::Sequence(1111),
        &MomentValue::Keyword(MomentKeyword::Now),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, RewindError::SequenceAfterHead { sq: 1111, head: 1100 }),
        "{err}"
    );
}

#[tokio::test]
async fn test_now_reads_as_head_end() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let (interval, _) = resolve::locate_interval(
        &playback,
        &MomentValue::Sequence(1090),
        &MomentValue::Keyword(MomentKeyword::Now),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(interval.end.metadata.sequence_number, 1100);
    assert_eq!(interval.end.target_time, walltime(1101));
    assert_eq!(interval.end.actual_time, walltime(1101));
    assert!(!interval.end.in_gap);
}

#[tokio::test]
async fn test_now_pinned_to_a_fixed_time() {
    let playback = start_playback().await;
    let pinned = walltime(1095) + TimeDelta::seconds(1);
    let mut context = LocateContext::new(&playback, None, Some(pinned))
        .await
        .unwrap();

    let (interval, _) = resolve::locate_interval(
        &playback,
        &MomentValue::Sequence(1090),
        &MomentValue::Keyword(MomentKeyword::Now),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(interval.end.metadata.sequence_number, 1095);
    assert_eq!(interval.end.target_time, pinned);

    // The pinned reading is memoized for the lifetime of the context.
    let again = resolve::locate_moment(
        &playback,
        &MomentValue::Keyword(MomentKeyword::Now),
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(again, interval.end);
}

#[tokio::test]
async fn test_earliest_is_unsupported() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let err = resolve::locate_moment(
        &playback,
        &MomentValue::Keyword(MomentKeyword::Earliest),
        &mut context,
    )
    .await
    .unwrap_err();

    match err {
        RewindError::ResolveMoment { source, .. } => {
            assert!(matches!(*source, RewindError::UnsupportedKeyword(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_expression_moments() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    // A sequence anchor plus an offset: start lands 30 s after sq 1010.
    let start = moment::parse_interval_part("1010 + 30s").unwrap();
    let (interval, _) = resolve::locate_interval(
        &playback,
        &start,
        &MomentValue::Duration(TimeDelta::seconds(10)),
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(interval.start.metadata.sequence_number, 1025);
    assert_eq!(interval.start.target_time, walltime(1025));
    assert_eq!(interval.end.metadata.sequence_number, 1029);

    // `now` minus an offset resolved on the end side.
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();
    let end = moment::parse_interval_part("now - 1m").unwrap();
    let (interval, _) = resolve::locate_interval(
        &playback,
        &MomentValue::Sequence(1000),
        &end,
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(interval.end.metadata.sequence_number, 1070);
    assert_eq!(interval.end.actual_time, walltime(1071));
}

#[tokio::test]
async fn test_locate_single_moment() {
    let playback = start_playback().await;
    let mut context = LocateContext::new(&playback, None, None).await.unwrap();

    let moment = resolve::locate_moment(
        &playback,
        &MomentValue::Time(walltime(1042) + TimeDelta::milliseconds(700)),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(moment.metadata.sequence_number, 1042);
    assert!(!moment.in_gap);
}
