use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use syncify_core::config::{OffsetFilter, SyncConfig};
use syncify_core::room::RoomCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod admin;
mod listen;

/// Listen to the same track, in sync, on every device in a room.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Relay WebSocket endpoint
    #[arg(long, env = "SYNCIFY_RELAY", default_value = "ws://127.0.0.1:3000/ws", global = true)]
    relay: Url,

    /// TOML file with protocol tuning
    #[arg(long, env = "SYNCIFY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Probe period for listeners
    #[arg(long, global = true)]
    probe_interval_ms: Option<u64>,

    /// Heartbeat period for the admin
    #[arg(long, global = true)]
    heartbeat_interval_ms: Option<u64>,

    /// Smooth clock offsets with this EWMA weight (0, 1]
    #[arg(long, global = true)]
    smoothing: Option<f64>,

    /// Ignore intents older than the newest one applied
    #[arg(long, global = true)]
    discard_stale: bool,

    /// Forget listeners not heard from within this many ms
    #[arg(long, global = true)]
    idle_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a room and drive playback of a track
    Admin {
        /// YouTube link or id, or a direct audio URL
        track: String,
    },
    /// Join a room and follow the admin
    Listen {
        /// Room code shown by the admin
        #[arg(value_parser = RoomCode::from_str)]
        room: RoomCode,
    },
}

impl Cli {
    fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::default(),
        };
        if let Some(ms) = self.probe_interval_ms {
            config.probe_interval_ms = ms;
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = ms;
        }
        if let Some(alpha) = self.smoothing {
            config.offset_filter = OffsetFilter::Ewma { alpha };
        }
        if self.discard_stale {
            config.discard_stale_intents = true;
        }
        if self.idle_timeout_ms.is_some() {
            config.registry_idle_timeout_ms = self.idle_timeout_ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncify=warn,syncify_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.sync_config()?;

    match cli.command {
        Command::Admin { track } => admin::run(&cli.relay, &track, config).await,
        Command::Listen { room } => listen::run(&cli.relay, room, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "syncify",
            "listen",
            "room-ab12cd",
            "--smoothing",
            "0.5",
            "--discard-stale",
            "--probe-interval-ms",
            "500",
        ]);
        let config = cli.sync_config().unwrap();
        assert_eq!(config.offset_filter, OffsetFilter::Ewma { alpha: 0.5 });
        assert!(config.discard_stale_intents);
        assert_eq!(config.probe_interval_ms, 500);
        assert_eq!(config.heartbeat_interval_ms, 2000);
        assert!(matches!(cli.command, Command::Listen { room } if room.as_str() == "AB12CD"));
    }

    #[test]
    fn room_codes_are_normalised_like_the_admin_prints_them() {
        for raw in ["ab12cd", "AB12CD", " room-ab12cd "] {
            let cli = Cli::parse_from(["syncify", "listen", raw]);
            assert!(matches!(cli.command, Command::Listen { room } if room.as_str() == "AB12CD"), "{raw}");
        }
        assert!(Cli::try_parse_from(["syncify", "listen", "ab-12"]).is_err());
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = Cli::parse_from(["syncify", "admin", "dQw4w9WgXcQ", "--smoothing", "2"]);
        assert!(cli.sync_config().is_err());
    }
}
