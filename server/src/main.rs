use clap::Parser;
use std::path::PathBuf;
use syncify_relay::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// WebSocket relay for syncify rooms.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "SYNCIFY_PORT", default_value_t = 3000)]
    port: u16,

    /// Directory served under /media for listeners to download from
    #[arg(long, env = "SYNCIFY_MEDIA_DIR")]
    media_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncify_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if let Some(dir) = &args.media_dir {
        anyhow::ensure!(dir.is_dir(), "media dir {} is not a directory", dir.display());
        tracing::info!("hosting media from {}", dir.display());
    }

    syncify_relay::run(args.port, AppState::new(args.media_dir)).await
}
