//! Manifest composition against a live playback session.
//!
//! The presentation time offset of a manifest has to match the media-internal
//! timestamps of the referenced segments, so the first segment of the range
//! is probed with ffprobe before the manifest is written.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{RewindError, RewindResult};
use crate::mpd;
use crate::playback::{Playback, RewindInterval, RewindMoment};

/// Composes a static manifest spanning `interval`, served under `server_base`.
pub async fn compose_static(
    playback: &Playback,
    interval: &RewindInterval,
    server_base: &str,
) -> RewindResult<String> {
    let segment = playback
        .download_segment(
            playback.probe_itag(),
            interval.start.metadata.sequence_number,
        )
        .await?;
    let offset = extract_presentation_timestamp(&segment).await?;
    mpd::compose_static(playback.info(), interval, server_base, offset)
}

/// Composes a dynamic manifest anchored on `moment`.
pub async fn compose_dynamic(
    playback: &Playback,
    moment: &RewindMoment,
    server_base: &str,
) -> RewindResult<String> {
    let segment = playback
        .download_segment(playback.probe_itag(), moment.metadata.sequence_number)
        .await?;
    let offset = extract_presentation_timestamp(&segment).await?;
    mpd::compose_dynamic(playback.info(), moment, server_base, offset)
}

/// Reads the first packet PTS of a media segment, in seconds.
pub async fn extract_presentation_timestamp(segment: &[u8]) -> RewindResult<f64> {
    let ffprobe = which::which("ffprobe")?;

    let mut child = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-i",
            "pipe:0",
            "-show_entries",
            "packet=pts_time",
            "-read_intervals",
            "%+#1",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        // ffprobe closes its input as soon as the first packet is read.
        let _ = stdin.write_all(segment).await;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(RewindError::CommandFailed {
            program: "ffprobe".to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let timestamp = stdout.lines().next().unwrap_or("").trim();
    timestamp
        .parse::<f64>()
        .map_err(|_| RewindError::InvalidPresentationTimestamp(timestamp.to_string()))
}
