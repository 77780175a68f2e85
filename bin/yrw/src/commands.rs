use std::sync::Arc;

use anyhow::Context;
use rewind::resolve::LocateOutput;
use rewind::util;
use rewind::{Playback, YtDlpProvider};

pub mod capture;
pub mod download;
pub mod serve;

pub async fn start_playback(video_id: &str) -> anyhow::Result<Arc<Playback>> {
    println!(
        "(<<) Collecting info about {}...",
        util::url::build_video_live_url(video_id)
    );

    let provider = YtDlpProvider::new(video_id).context("finding yt-dlp")?;
    let playback = Playback::new(Box::new(provider))
        .await
        .context("starting playback")?;

    println!("Stream '{}' is alive!", playback.info().title);

    Ok(Arc::new(playback))
}

pub fn build_output_name(output: &LocateOutput) -> String {
    format!(
        "{}_{}_{}_{}",
        util::path::adjust_for_filename(&output.title, 0),
        output.id,
        util::path::format_time(output.input_start_time),
        util::path::format_duration(output.input_duration),
    )
}
