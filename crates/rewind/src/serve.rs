//! Embedded playback server.
//!
//! Serves manifests and re-serves upstream segments so that a local player
//! or downloader never talks to the CDN directly:
//!
//! - `GET /mpd/*interval` composes a manifest; an interval (with `/` or
//!   `--`) yields a static one, a single moment a dynamic (live) one.
//! - `GET /segments/itag/:itag/sq/:sq` streams raw segment bytes.
//! - `GET /info` reports stream metadata as JSON.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{RewindError, RewindResult};
use crate::moment;
use crate::playback::Playback;
use crate::resolve::{self, LocateContext};
use crate::{compose, util};

pub struct ServerState {
    pub playback: Arc<Playback>,
    pub server_base: String,
}

impl ServerState {
    pub fn new(playback: Arc<Playback>, port: u16) -> Self {
        Self {
            playback,
            server_base: util::url::format_server_address(port),
        }
    }
}

/// Router for serve mode: manifests are located per request.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/mpd/*interval", get(mpd_handler))
        .route("/segments/itag/:itag/sq/:sq", get(segment_handler))
        .route("/info", get(info_handler))
        .with_state(state)
}

/// Router for download mode: one pre-composed manifest, frozen for the
/// lifetime of the job.
pub fn static_router(state: Arc<ServerState>, manifest: String) -> Router {
    Router::new()
        .route(
            "/mpd",
            get(move || {
                let manifest = manifest.clone();
                async move {
                    (
                        [(header::CONTENT_TYPE, "application/dash+xml")],
                        manifest,
                    )
                }
            }),
        )
        .route("/segments/itag/:itag/sq/:sq", get(segment_handler))
        .with_state(state)
}

async fn mpd_handler(
    State(state): State<Arc<ServerState>>,
    Path(interval): Path<String>,
) -> Response {
    match respond_mpd(&state, &interval).await {
        Ok(manifest) => (
            [(header::CONTENT_TYPE, "application/dash+xml")],
            manifest,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(value = interval, err = %e, "composing manifest");
            (status_for(&e), format!("composing manifest: {e}\n")).into_response()
        }
    }
}

async fn respond_mpd(state: &ServerState, param: &str) -> RewindResult<String> {
    let is_interval = param.contains('/') || param.contains("--");

    if is_interval {
        let (start, end) = moment::parse_interval(param)?;
        let mut context = LocateContext::new(&state.playback, None, None).await?;
        let (interval, _) =
            resolve::locate_interval(&state.playback, &start, &end, &mut context).await?;
        compose::compose_static(&state.playback, &interval, &state.server_base).await
    } else {
        let value = moment::parse_interval_part(param)?;
        let mut context = LocateContext::new(&state.playback, None, None).await?;
        let moment = resolve::locate_moment(&state.playback, &value, &mut context).await?;
        compose::compose_dynamic(&state.playback, &moment, &state.server_base).await
    }
}

async fn segment_handler(
    State(state): State<Arc<ServerState>>,
    Path((itag, sq)): Path<(String, u64)>,
) -> Response {
    match state.playback.download_segment(&itag, sq).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(itag, sq, err = %e, "streaming segment");
            (status_for(&e), format!("streaming segment: {e}\n")).into_response()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonInfo {
    id: String,
    title: String,
    channel_id: String,
    channel_title: String,
    actual_start_time: Option<DateTime<Utc>>,
}

async fn info_handler(State(state): State<Arc<ServerState>>) -> Json<JsonInfo> {
    let info = state.playback.info();
    Json(JsonInfo {
        id: info.id.clone(),
        title: info.title.clone(),
        channel_id: info.channel_id.clone(),
        channel_title: info.channel_title.clone(),
        actual_start_time: info.actual_start_time,
    })
}

fn status_for(error: &RewindError) -> StatusCode {
    match error {
        RewindError::Parse(_)
        | RewindError::TimeAfterHead(_)
        | RewindError::SequenceAfterHead { .. }
        | RewindError::StartAfterEnd
        | RewindError::UnsupportedKeyword(_)
        | RewindError::BadMomentType(_) => StatusCode::BAD_REQUEST,
        RewindError::ResolveMoment { source, .. } => status_for(source),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
