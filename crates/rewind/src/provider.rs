use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta};
use serde::Deserialize;
use tokio::process::Command;
use url::Url;

use crate::error::{RewindError, RewindResult};
use crate::info::{AudioStream, StreamInfo, VideoStream};
use crate::util;

/// Source of stream information and of fresh segment base URLs.
///
/// `fetch_info` runs once at session start; `fetch_base_urls` is invoked by
/// the playback layer whenever the signed base URLs expire.
#[async_trait]
pub trait InfoProvider {
    async fn fetch_info(&self) -> RewindResult<StreamInfo>;

    async fn fetch_base_urls(&self) -> RewindResult<HashMap<String, Url>>;
}

/// Info provider backed by `yt-dlp --dump-json --live-from-start`.
pub struct YtDlpProvider {
    video_id: String,
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
struct JsonDump {
    title: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    release_timestamp: Option<i64>,
    formats: Vec<JsonFormat>,
}

#[derive(Debug, Deserialize)]
struct JsonFormat {
    #[serde(default)]
    fragment_base_url: Option<String>,
    format_id: String,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    asr: Option<f64>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    fps: Option<f64>,
}

impl YtDlpProvider {
    pub fn new(video_id: impl Into<String>) -> RewindResult<Self> {
        Ok(Self {
            video_id: video_id.into(),
            program: which::which("yt-dlp")?,
        })
    }

    async fn dump_json(&self) -> RewindResult<JsonDump> {
        tracing::debug!(video_id = %self.video_id, "dumping video info");
        let output = Command::new(&self.program)
            .args(["--dump-json", "--live-from-start"])
            .arg(&self.video_id)
            .output()
            .await?;
        if !output.status.success() {
            return Err(RewindError::CommandFailed {
                program: "yt-dlp".to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl InfoProvider for YtDlpProvider {
    async fn fetch_info(&self) -> RewindResult<StreamInfo> {
        let dump = self.dump_json().await?;

        let mut audio_streams = Vec::new();
        let mut video_streams = Vec::new();
        for format in &dump.formats {
            // Non-fragmented formats (storyboards, plain https) carry no
            // segment base URL and cannot be rewound.
            let Some(base_url) = format.fragment_base_url.as_deref() else {
                continue;
            };
            let base_url = Url::parse(base_url)?;

            let mime_type = util::url::extract_parameter(base_url.path(), "mime")
                .map(|raw| util::url::percent_decode(&raw))
                .ok_or_else(|| {
                    RewindError::InfoDump(format!(
                        "missing mime type parameter in base URL: {base_url}"
                    ))
                })?;

            if format.vcodec.as_deref() == Some("none") {
                audio_streams.push(AudioStream {
                    itag: format.format_id.clone(),
                    base_url,
                    mime_type,
                    codecs: format.acodec.clone().unwrap_or_default(),
                    sampling_rate: format.asr.unwrap_or_default() as u32,
                });
            } else {
                video_streams.push(VideoStream {
                    itag: format.format_id.clone(),
                    base_url,
                    mime_type,
                    codecs: format.vcodec.clone().unwrap_or_default(),
                    width: format.width.unwrap_or_default() as u32,
                    height: format.height.unwrap_or_default() as u32,
                    frame_rate: format.fps.unwrap_or_default() as u32,
                });
            }
        }

        let Some(some_video) = video_streams.first() else {
            return Err(RewindError::InfoDump(
                "no fragmented video formats in dump".to_string(),
            ));
        };

        let duration_raw = util::url::extract_parameter(some_video.base_url.path(), "dur")
            .ok_or_else(|| {
                RewindError::InfoDump(format!(
                    "no 'dur' parameter in base URL: {}",
                    some_video.base_url
                ))
            })?;
        let duration_seconds = duration_raw.parse::<f64>().map_err(|e| {
            RewindError::InfoDump(format!("parsing segment duration '{duration_raw}': {e}"))
        })?;
        let segment_duration = TimeDelta::from_std(Duration::from_secs_f64(duration_seconds))
            .map_err(|e| RewindError::InfoDump(format!("segment duration out of range: {e}")))?;

        Ok(StreamInfo {
            id: self.video_id.clone(),
            title: dump.title,
            channel_id: dump.channel_id,
            channel_title: dump.channel,
            actual_start_time: dump
                .release_timestamp
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            segment_duration,
            audio_streams,
            video_streams,
        })
    }

    async fn fetch_base_urls(&self) -> RewindResult<HashMap<String, Url>> {
        let dump = self.dump_json().await?;

        let mut base_urls = HashMap::new();
        for format in &dump.formats {
            if let Some(base_url) = format.fragment_base_url.as_deref() {
                base_urls.insert(format.format_id.clone(), Url::parse(base_url)?);
            }
        }

        Ok(base_urls)
    }
}
