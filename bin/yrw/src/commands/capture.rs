use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Subcommand};
use rewind::moment::{self, MomentValue};
use rewind::resolve::{self, LocateContext};
use rewind::util;
use rewind::capture;

/// Capture frames from a live stream.
#[derive(Subcommand, Clone)]
pub enum CaptureCommand {
    /// Capture a single frame
    Frame(FrameCommand),
    /// Capture a series of frames
    Timelapse(TimelapseCommand),
}

impl CaptureCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            CaptureCommand::Frame(command) => command.run().await,
            CaptureCommand::Timelapse(command) => command.run().await,
        }
    }
}

#[derive(Args, Clone)]
pub struct FrameCommand {
    /// YouTube video ID
    video_id: String,

    /// Moment to capture
    #[clap(short, long)]
    moment: String,

    /// Output image format
    #[clap(long = "of", default_value = "png")]
    output_format: String,
}

impl FrameCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let value = moment::parse_interval_part(&self.moment).context("parsing interval")?;

        let playback = super::start_playback(&self.video_id).await?;

        println!("(<<) Locating and capturing the moment...");
        let mut context = LocateContext::new(&playback, None, Some(Utc::now()))
            .await
            .context("locating moment")?;
        let moment = resolve::locate_moment(&playback, &value, &mut context)
            .await
            .context("locating moment")?;

        if moment.in_gap {
            println!("Moment falls into a stream gap, exit");
            return Ok(());
        }

        println!(
            "Frame time: {}, sq={}",
            moment.target_time.to_rfc2822(),
            moment.metadata.sequence_number,
        );

        let info = playback.info();
        let output_path = format!(
            "{}_{}_{}.{}",
            util::path::adjust_for_filename(&info.title, 0),
            info.id,
            util::path::format_time(moment.target_time),
            self.output_format,
        );
        capture::capture_frame(&playback, &moment, Path::new(&output_path))
            .await
            .context("extracting frame")?;

        println!("Success! Saved to '{output_path}'");

        Ok(())
    }
}

#[derive(Args, Clone)]
pub struct TimelapseCommand {
    /// YouTube video ID
    video_id: String,

    /// Time or segment interval
    #[clap(short, long)]
    interval: String,

    /// Capture a frame every duration, e.g. '30s'
    #[clap(short, long)]
    every: String,

    /// Output image format
    #[clap(long = "of", default_value = "png")]
    output_format: String,
}

impl TimelapseCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let (start, end) = moment::parse_interval(&self.interval).context("parsing interval")?;
        let MomentValue::Duration(every) =
            moment::parse_interval_part(&self.every).context("parsing interval")?
        else {
            anyhow::bail!("'{}' is not a duration", self.every);
        };

        let playback = super::start_playback(&self.video_id).await?;

        println!("(<<) Locating start and end moments...");
        let mut context = LocateContext::new(&playback, None, Some(Utc::now()))
            .await
            .context("locating moment")?;
        let (interval, output) = resolve::locate_interval(&playback, &start, &end, &mut context)
            .await
            .context("locating moment")?;

        let mut times = Vec::new();
        let mut time = interval.start.target_time;
        while time <= interval.end.target_time {
            times.push(time);
            time += every;
        }

        println!("(<<) Capturing {} frames...", times.len());
        let prefix = super::build_output_name(&output);
        let output_format = self.output_format.clone();
        let outcome = capture::capture_frames(&playback, &times, &context, |index| {
            PathBuf::from(format!("{prefix}_{index:05}.{output_format}"))
        })
        .await
        .context("extracting frame")?;

        println!(
            "Success! Captured {} frames, skipped {} in gaps",
            outcome.captured, outcome.skipped
        );

        Ok(())
    }
}
