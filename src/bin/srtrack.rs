//! srtrack - Safety Rating tracker for F1 2019 UDP telemetry.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use srtrack::source::{CaptureWriter, Recording};
use srtrack::{
    Config, LoopSummary, Pacing, ReplaySource, SqliteStore, Store, Tracker, UdpSource, http,
    overlay,
};

#[derive(Parser, Debug)]
#[command(name = "srtrack", version)]
#[command(about = "Track a safety rating from F1 2019 UDP telemetry")]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "SRTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// UDP port the game sends telemetry to
    #[arg(long)]
    udp_port: Option<u16>,

    /// Port for the HTTP read API
    #[arg(long)]
    http_port: Option<u16>,

    /// History database path
    #[arg(long, env = "SRTRACK_DB")]
    db: Option<PathBuf>,

    /// Do not log the overlay line
    #[arg(long)]
    no_overlay: bool,

    /// Do not serve the HTTP read API
    #[arg(long)]
    no_dashboard: bool,

    /// Reset the rating to 2.50 before tracking
    #[arg(long)]
    reset: bool,

    /// Replay a capture file instead of listening on UDP
    #[arg(long, conflicts_with = "record")]
    replay: Option<PathBuf>,

    /// Replay speed multiplier; 0 replays as fast as possible
    #[arg(long, default_value_t = 1.0)]
    replay_speed: f64,

    /// Record received datagrams to a capture file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Track this car index instead of the player car
    #[arg(long)]
    car_index: Option<u8>,

    /// More logging (-v debug, -vv trace); RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.udp_port {
            config.telemetry.port = port;
        }
        if let Some(port) = self.http_port {
            config.dashboard.port = port;
        }
        if let Some(db) = &self.db {
            config.store.path = db.clone();
        }
        if let Some(index) = self.car_index {
            config.telemetry.car_index = Some(index);
        }
        if self.no_overlay {
            config.overlay.enabled = false;
        }
        if self.no_dashboard {
            config.dashboard.enabled = false;
        }
    }
}

enum Exit {
    Signal,
    Finished(srtrack::Result<LoopSummary>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.store.path)
            .with_context(|| format!("opening history database {}", config.store.path.display()))?,
    );
    info!(path = %config.store.path.display(), "history database ready");

    // Bind everything before the loop starts so port conflicts fail fast.
    let listener = if config.dashboard.enabled {
        Some(http::bind(config.dashboard_addr()).await.context("binding the read API")?)
    } else {
        None
    };
    let mut tracker = start_tracker(&cli, &config, store).await?;

    let http_task = listener.map(|listener| {
        tokio::spawn(http::serve(listener, tracker.api(), tracker.cancel_token()))
    });
    let overlay_task = config.overlay.enabled.then(|| {
        overlay::spawn(tracker.subscribe(config.overlay.rate()), tracker.cancel_token())
    });

    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => Exit::Signal,
        summary = tracker.finished() => Exit::Finished(summary),
    };
    let summary = match exit {
        Exit::Signal => {
            info!("interrupted, closing open session");
            tracker.shutdown().await?
        }
        Exit::Finished(summary) => {
            drop(tracker);
            summary?
        }
    };

    if let Some(task) = http_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "read API stopped with an error"),
            Err(e) => warn!(error = %e, "read API task failed"),
        }
    }
    if let Some(task) = overlay_task {
        let _ = task.await;
    }

    info!(
        datagrams = summary.datagrams,
        decode_errors = summary.decode_errors,
        sessions = summary.sessions_closed,
        "srtrack stopped"
    );
    Ok(())
}

async fn start_tracker(cli: &Cli, config: &Config, store: Arc<dyn Store>) -> Result<Tracker> {
    let loop_config = config.loop_config(cli.reset);

    if let Some(path) = &cli.replay {
        let pacing =
            if cli.replay_speed > 0.0 { Pacing::realtime(cli.replay_speed) } else { Pacing::Unpaced };
        let source = ReplaySource::open(path, pacing)
            .with_context(|| format!("opening capture {}", path.display()))?;
        return Ok(Tracker::start(source, store, loop_config).await?);
    }

    let udp = UdpSource::bind(config.telemetry_addr())
        .await
        .context("binding the telemetry socket")?
        .with_send_rate(config.telemetry.send_rate_hz);
    match &cli.record {
        Some(path) => {
            let writer = CaptureWriter::create(path)
                .with_context(|| format!("creating capture {}", path.display()))?;
            Ok(Tracker::start(Recording::new(udp, writer), store, loop_config).await?)
        }
        None => Ok(Tracker::start(udp, store, loop_config).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "srtrack",
            "--udp-port",
            "20800",
            "--http-port",
            "9000",
            "--db",
            "/tmp/sr.db",
            "--no-overlay",
            "--car-index",
            "4",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.telemetry.port, 20800);
        assert_eq!(config.dashboard.port, 9000);
        assert_eq!(config.store.path, PathBuf::from("/tmp/sr.db"));
        assert!(!config.overlay.enabled);
        assert!(config.dashboard.enabled);
        assert_eq!(config.telemetry.car_index, Some(4));
    }

    #[test]
    fn replay_and_record_conflict() {
        let result = Cli::try_parse_from(["srtrack", "--replay", "a.srcap", "--record", "b.srcap"]);
        assert!(result.is_err());
    }
}
