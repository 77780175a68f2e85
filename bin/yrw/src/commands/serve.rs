use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use rewind::serve::{self, ServerState};

/// Start a playback server for a live stream.
#[derive(Args, Clone)]
pub struct ServeCommand {
    /// YouTube video ID
    video_id: String,

    /// Port to start playback on
    #[clap(short, long, default_value = "8080")]
    port: u16,
}

impl ServeCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let playback = super::start_playback(&self.video_id).await?;

        let state = Arc::new(ServerState::new(playback, self.port));
        let router = serve::router(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.port))
            .await
            .context("binding playback server")?;
        println!(
            "(<<) Playback started and listening on {}...",
            state.server_base
        );

        axum::serve(listener, router)
            .await
            .context("running playback server")?;

        Ok(())
    }
}
