use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use rewind::resolve::{self, LocateContext};
use rewind::serve::{self, ServerState};
use rewind::util;
use rewind::{compose, moment};

/// Download a live stream excerpt.
#[derive(Args, Clone)]
pub struct DownloadCommand {
    /// YouTube video ID
    video_id: String,

    /// Interval to rewind, e.g. '2026-01-02T10:20/1h' or '7959599/now'
    #[clap(short, long)]
    interval: String,

    /// Port to start playback on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Extra options passed through to yt-dlp
    #[clap(last = true)]
    downstream: Vec<String>,
}

impl DownloadCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let (start, end) =
            moment::parse_interval(&self.interval).context("parsing interval")?;

        let playback = super::start_playback(&self.video_id).await?;

        println!("(<<) Locating start and end moments...");
        let mut context = LocateContext::new(&playback, None, Some(Utc::now()))
            .await
            .context("locating moment")?;
        let (interval, output) = resolve::locate_interval(&playback, &start, &end, &mut context)
            .await
            .context("locating moment")?;

        println!(
            "Actual start: {}, sq={}",
            interval.start.actual_time.to_rfc2822(),
            interval.start.metadata.sequence_number,
        );
        println!(
            "  Actual end: {}, sq={}",
            interval.end.actual_time.to_rfc2822(),
            interval.end.metadata.sequence_number,
        );

        let server_base = util::url::format_server_address(self.port);
        let manifest = compose::compose_static(&playback, &interval, &server_base)
            .await
            .context("composing manifest")?;

        let state = Arc::new(ServerState {
            playback: playback.clone(),
            server_base: server_base.clone(),
        });
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.port))
            .await
            .context("binding playback server")?;
        let router = serve::static_router(state, manifest);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(err = %e, "playback server stopped");
            }
        });

        let output_name = format!("{}.%(ext)s", super::build_output_name(&output));
        let status = tokio::process::Command::new("yt-dlp")
            .arg(format!("{server_base}/mpd"))
            .args(["--newline", "--output", &output_name])
            .args(&self.downstream)
            .status()
            .await
            .context("running yt-dlp")?;
        if !status.success() {
            anyhow::bail!("downloading failed: yt-dlp exited with {status}");
        }

        Ok(())
    }
}
