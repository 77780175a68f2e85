//! Frame extraction from located moments.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{RewindError, RewindResult};
use crate::playback::{Playback, RewindMoment};
use crate::resolve::LocateContext;

#[derive(Debug, Default, Clone, Copy)]
pub struct TimelapseOutcome {
    pub captured: usize,
    pub skipped: usize,
}

/// Extracts the frame corresponding to a single moment into `output_path`.
pub async fn capture_frame(
    playback: &Playback,
    moment: &RewindMoment,
    output_path: &Path,
) -> RewindResult<()> {
    let itag = best_video_itag(playback)?;
    let segment = playback
        .download_segment(&itag, moment.metadata.sequence_number)
        .await?;
    extract_frame(moment, &segment, output_path).await
}

/// Extracts one frame per target time, walking the times in order.
///
/// The previously located segment becomes the reference for the next
/// search, which keeps jump counts small for densely spaced times, and a
/// segment shared by consecutive frames is downloaded only once. Moments
/// that fall into a gap are skipped.
pub async fn capture_frames(
    playback: &Playback,
    times: &[DateTime<Utc>],
    context: &LocateContext,
    output_for: impl Fn(usize) -> PathBuf,
) -> RewindResult<TimelapseOutcome> {
    let itag = best_video_itag(playback)?;

    let mut outcome = TimelapseOutcome::default();
    let mut reference = context.head;
    let mut previous: Option<(u64, Bytes)> = None;

    for (index, time) in times.iter().enumerate() {
        let moment = playback.locate_moment(*time, reference, false).await?;

        if moment.in_gap {
            tracing::info!(frame = index, time = %time, "moment falls into a gap, skipping");
            outcome.skipped += 1;
            continue;
        }

        let sq = moment.metadata.sequence_number;
        if previous.as_ref().map(|(prev_sq, _)| *prev_sq) != Some(sq) {
            let segment = playback.download_segment(&itag, sq).await?;
            previous = Some((sq, segment));
        }
        if let Some((_, segment)) = &previous {
            extract_frame(&moment, segment, &output_for(index)).await?;
        }

        outcome.captured += 1;
        reference = moment.metadata;
    }

    Ok(outcome)
}

fn best_video_itag(playback: &Playback) -> RewindResult<String> {
    playback
        .info()
        .best_video()
        .map(|stream| stream.itag.clone())
        .ok_or_else(|| RewindError::InfoDump("stream has no video variants".to_string()))
}

async fn extract_frame(
    moment: &RewindMoment,
    segment: &[u8],
    output_path: &Path,
) -> RewindResult<()> {
    let at = (moment.target_time - moment.metadata.time()).num_milliseconds() as f64 / 1000.0;
    tracing::debug!(sq = moment.metadata.sequence_number, at, "extracting frame");

    run_ffmpeg(
        &[
            "-hide_banner",
            "-y",
            "-i",
            "pipe:0",
            "-ss",
            &format!("{at:.3}"),
            "-vframes",
            "1",
            &output_path.to_string_lossy(),
        ],
        Some(segment),
    )
    .await?;

    // The requested instant may sit past the last frame of the segment;
    // ffmpeg then produces nothing and the last frame is used instead.
    if !tokio::fs::try_exists(output_path).await? {
        tracing::debug!("frame not found, extracting last frame");
        extract_last_frame(segment, output_path).await?;
    }

    Ok(())
}

async fn extract_last_frame(segment: &[u8], output_path: &Path) -> RewindResult<()> {
    let temp = tempfile::Builder::new().suffix(".mp4").tempfile()?;
    let temp_path = temp.path().to_string_lossy().into_owned();

    // Remux to a seekable file first; -sseof cannot be applied to a pipe.
    run_ffmpeg(
        &["-hide_banner", "-y", "-i", "pipe:0", "-c", "copy", &temp_path],
        Some(segment),
    )
    .await?;

    run_ffmpeg(
        &[
            "-hide_banner",
            "-y",
            "-sseof",
            "-1",
            "-i",
            &temp_path,
            "-update",
            "true",
            &output_path.to_string_lossy(),
        ],
        None,
    )
    .await
}

async fn run_ffmpeg(args: &[&str], stdin: Option<&[u8]>) -> RewindResult<()> {
    let ffmpeg = which::which("ffmpeg")?;

    let mut command = Command::new(ffmpeg);
    command.args(args).stderr(Stdio::piped());
    if stdin.is_some() {
        command.stdin(Stdio::piped());
    }

    let mut child = command.spawn()?;
    if let Some(bytes) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            // ffmpeg may stop reading once it has the frames it needs.
            let _ = pipe.write_all(bytes).await;
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(RewindError::CommandFailed {
            program: "ffmpeg".to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}
