use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

mod commands;

#[derive(Parser)]
#[clap(version, author, about = "Rewind, download and capture YouTube live streams")]
struct YrwArgs {
    #[clap(subcommand)]
    command: YrwCommand,
}

#[derive(Subcommand)]
enum YrwCommand {
    Download(commands::download::DownloadCommand),
    Serve(commands::serve::ServeCommand),
    #[clap(subcommand)]
    Capture(commands::capture::CaptureCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = YrwArgs::parse();
    match args.command {
        YrwCommand::Download(command) => command.run().await,
        YrwCommand::Serve(command) => command.run().await,
        YrwCommand::Capture(command) => command.run().await,
    }
}
