//! Test doubles: an in-process upstream CDN serving synthetic segment
//! metadata, and an info provider that never leaves the process.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::TimeDelta;
use url::Url;

use rewind::info::{AudioStream, StreamInfo, VideoStream};
use rewind::provider::InfoProvider;
use rewind::util;
use rewind::{Playback, RetryConfig};

pub const TEST_VIDEO_ID: &str = "test-video-id";
pub const VIDEO_ITAG: &str = "244";
pub const AUDIO_ITAG: &str = "140";

pub const SEGMENT_DURATION_US: i64 = 2_000_000;

/// Synthetic timeline: sequence number to (walltime in µs, duration in µs).
pub type Timeline = HashMap<u64, (i64, i64)>;

/// Adds a run of evenly spaced segments to a timeline.
pub fn add_run(
    timeline: &mut Timeline,
    sequences: std::ops::RangeInclusive<u64>,
    start_walltime_us: i64,
    spacing_us: i64,
) {
    let first = *sequences.start();
    for sq in sequences {
        let walltime = start_walltime_us + spacing_us * (sq - first) as i64;
        timeline.insert(sq, (walltime, SEGMENT_DURATION_US));
    }
}

pub fn uniform_timeline(
    sequences: std::ops::RangeInclusive<u64>,
    start_walltime_us: i64,
) -> Timeline {
    let mut timeline = Timeline::new();
    add_run(&mut timeline, sequences, start_walltime_us, SEGMENT_DURATION_US);
    timeline
}

/// Upstream with a one-second hole between sq 7959599 and 7959600 and
/// another above, so that jumps from the head land short of the target.
pub fn gap_case_1() -> (Timeline, u64) {
    let mut timeline = Timeline::new();
    // Up to and including 7959599: even spacing backwards.
    add_run(
        &mut timeline,
        7_959_569..=7_959_599,
        1_679_788_193_600_178 - 30 * SEGMENT_DURATION_US,
        SEGMENT_DURATION_US,
    );
    add_run(
        &mut timeline,
        7_959_600..=7_959_602,
        1_679_788_196_600_287,
        SEGMENT_DURATION_US,
    );
    add_run(
        &mut timeline,
        7_959_603..=7_959_640,
        1_679_788_196_600_287 + 3 * SEGMENT_DURATION_US + 1_000_000,
        SEGMENT_DURATION_US,
    );
    (timeline, 7_959_640)
}

/// Upstream with a real 4.2 s hole after sq 7958103, followed by a burst of
/// closely spaced segments as the encoder catches up.
pub fn gap_case_3() -> (Timeline, u64) {
    let mut timeline = Timeline::new();
    add_run(
        &mut timeline,
        7_958_080..=7_958_102,
        1_679_785_199_451_000 - 22 * SEGMENT_DURATION_US,
        SEGMENT_DURATION_US,
    );
    timeline.insert(7_958_103, (1_679_785_201_449_800, SEGMENT_DURATION_US));
    timeline.insert(7_958_104, (1_679_785_207_649_800, SEGMENT_DURATION_US));
    timeline.insert(7_958_105, (1_679_785_208_860_000, SEGMENT_DURATION_US));
    timeline.insert(7_958_106, (1_679_785_208_900_000, SEGMENT_DURATION_US));
    add_run(
        &mut timeline,
        7_958_107..=7_958_140,
        1_679_785_208_960_000,
        SEGMENT_DURATION_US,
    );
    (timeline, 7_958_140)
}

pub struct MockUpstream {
    pub timeline: Timeline,
    pub head_sq: u64,
    /// Answer byte-range requests with 206 instead of a plain 200.
    pub partial_content: bool,
    /// Reply 503 to the first attempt on every distinct URL.
    pub inject_503: bool,
    /// Leave out the `X-Head-Seqnum` header on head probes.
    pub omit_head_header: bool,
    /// When set, any path outside this prefix is rejected with 403.
    pub valid_prefix: Mutex<Option<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    pub last_rebuilt_url: Mutex<Option<String>>,
}

impl MockUpstream {
    pub fn new(timeline: Timeline, head_sq: u64) -> Self {
        Self {
            timeline,
            head_sq,
            partial_content: false,
            inject_503: false,
            omit_head_header: false,
            valid_prefix: Mutex::new(None),
            attempts: Mutex::new(HashMap::new()),
            last_rebuilt_url: Mutex::new(None),
        }
    }

    pub fn with_partial_content(mut self) -> Self {
        self.partial_content = true;
        self
    }

    pub fn with_injected_503(mut self) -> Self {
        self.inject_503 = true;
        self
    }

    pub fn without_head_header(mut self) -> Self {
        self.omit_head_header = true;
        self
    }

    pub fn restrict_to_prefix(&self, prefix: &str) {
        *self.valid_prefix.lock().unwrap() = Some(prefix.to_string());
    }
}

async fn upstream_handler(
    State(state): State<Arc<MockUpstream>>,
    request: Request,
) -> Response<Body> {
    let path = request.uri().path().to_string();

    let attempt = {
        let mut attempts = state.attempts.lock().unwrap();
        let entry = attempts.entry(path.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    if let Some(rebuilt) = request.headers().get("X-Request-Url") {
        *state.last_rebuilt_url.lock().unwrap() =
            rebuilt.to_str().ok().map(|s| s.to_string());
    }

    if state.inject_503 && attempt == 1 {
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }

    if let Some(prefix) = state.valid_prefix.lock().unwrap().as_deref() {
        if !path.starts_with(prefix) {
            return status_response(StatusCode::FORBIDDEN);
        }
    }

    let Some(sq) = util::url::extract_parameter(&path, "sq") else {
        // A request on the bare base URL probes the head sequence number.
        if state.omit_head_header {
            return status_response(StatusCode::OK);
        }
        return Response::builder()
            .header("X-Head-Seqnum", state.head_sq.to_string())
            .body(Body::empty())
            .unwrap();
    };
    let Ok(sq) = sq.parse::<u64>() else {
        return status_response(StatusCode::BAD_REQUEST);
    };
    let Some((walltime_us, duration_us)) = state.timeline.get(&sq) else {
        return status_response(StatusCode::NOT_FOUND);
    };

    let body = format!(
        "Sequence-Number: {sq}\r\nIngestion-Walltime-Us: {walltime_us}\r\nTarget-Duration-Us: {duration_us}\r\n"
    );

    let status = if state.partial_content && request.headers().contains_key(header::RANGE) {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap()
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

/// Serves `upstream` on a local port and returns its base address.
pub async fn start_upstream(upstream: Arc<MockUpstream>) -> String {
    let router = Router::new()
        .fallback(upstream_handler)
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub struct MockProvider {
    server: String,
    initial_prefix: String,
    refreshed_prefix: String,
    pub base_url_calls: AtomicU32,
}

impl MockProvider {
    pub fn new(server: &str) -> Self {
        Self::with_prefixes(server, "/videoplayback", "/videoplayback")
    }

    pub fn with_prefixes(server: &str, initial: &str, refreshed: &str) -> Self {
        Self {
            server: server.to_string(),
            initial_prefix: initial.to_string(),
            refreshed_prefix: refreshed.to_string(),
            base_url_calls: AtomicU32::new(0),
        }
    }

    fn base_url(&self, prefix: &str, itag: &str, mime: &str) -> Url {
        Url::parse(&format!(
            "{}{prefix}/expire/1679800000/itag/{itag}/mime/{mime}/dur/2.000",
            self.server
        ))
        .unwrap()
    }
}

#[async_trait]
impl InfoProvider for MockProvider {
    async fn fetch_info(&self) -> rewind::RewindResult<StreamInfo> {
        Ok(StreamInfo {
            id: TEST_VIDEO_ID.to_string(),
            title: "Test Stream".to_string(),
            channel_id: "UC0000000000000000000000".to_string(),
            channel_title: "Test Channel".to_string(),
            actual_start_time: None,
            segment_duration: TimeDelta::microseconds(SEGMENT_DURATION_US),
            audio_streams: vec![AudioStream {
                itag: AUDIO_ITAG.to_string(),
                base_url: self.base_url(&self.initial_prefix, AUDIO_ITAG, "audio%2Fmp4"),
                mime_type: "audio/mp4".to_string(),
                codecs: "mp4a.40.2".to_string(),
                sampling_rate: 44_100,
            }],
            video_streams: vec![VideoStream {
                itag: VIDEO_ITAG.to_string(),
                base_url: self.base_url(&self.initial_prefix, VIDEO_ITAG, "video%2Fwebm"),
                mime_type: "video/webm".to_string(),
                codecs: "vp9".to_string(),
                width: 854,
                height: 480,
                frame_rate: 30,
            }],
        })
    }

    async fn fetch_base_urls(&self) -> rewind::RewindResult<HashMap<String, Url>> {
        self.base_url_calls.fetch_add(1, Ordering::SeqCst);
        let mut base_urls = HashMap::new();
        base_urls.insert(
            AUDIO_ITAG.to_string(),
            self.base_url(&self.refreshed_prefix, AUDIO_ITAG, "audio%2Fmp4"),
        );
        base_urls.insert(
            VIDEO_ITAG.to_string(),
            self.base_url(&self.refreshed_prefix, VIDEO_ITAG, "video%2Fwebm"),
        );
        Ok(base_urls)
    }
}

fn test_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 4,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
    }
}

/// Delegating handle so tests can keep a reference to the provider after
/// the playback session takes ownership.
pub struct SharedProvider(pub Arc<MockProvider>);

#[async_trait]
impl InfoProvider for SharedProvider {
    async fn fetch_info(&self) -> rewind::RewindResult<StreamInfo> {
        self.0.fetch_info().await
    }

    async fn fetch_base_urls(&self) -> rewind::RewindResult<HashMap<String, Url>> {
        self.0.fetch_base_urls().await
    }
}

/// Spins up a mock upstream plus a playback session wired to it.
pub async fn start_playback(upstream: MockUpstream) -> (Playback, Arc<MockUpstream>) {
    let (playback, upstream, _) =
        start_playback_with_provider(upstream, MockProvider::new).await;
    (playback, upstream)
}

pub async fn start_playback_with_provider(
    upstream: MockUpstream,
    provider: impl FnOnce(&str) -> MockProvider,
) -> (Playback, Arc<MockUpstream>, Arc<MockProvider>) {
    let upstream = Arc::new(upstream);
    let server = start_upstream(upstream.clone()).await;
    let provider = Arc::new(provider(&server));
    let playback = Playback::new(Box::new(SharedProvider(provider.clone())))
        .await
        .unwrap()
        .with_retry(test_retry());
    (playback, upstream, provider)
}
