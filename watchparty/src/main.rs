use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use watchparty_core::{
    logging,
    media::{AutoplayPolicy, MediaSource, SimulatedPlayer},
    models::RoomId,
    service::ViewerPhase,
    session::{HostHandle, ViewerHandle},
    Config,
};
use watchparty_hub::LocalParty;

#[derive(Parser, Debug)]
#[command(name = "watchparty")]
#[command(about = "Run a simulated watch party over the in-process relay", long_about = None)]
struct Args {
    /// Configuration file (TOML/YAML/JSON)
    #[arg(long, env = "WATCHPARTY_CONFIG")]
    config: Option<String>,

    /// Room to host
    #[arg(long, env = "WATCHPARTY_ROOM", default_value = "movie-night")]
    room: String,

    /// Number of simulated viewers
    #[arg(long, env = "WATCHPARTY_VIEWERS", default_value = "2")]
    viewers: usize,

    /// Media file name announced by the host
    #[arg(long, default_value = "movie.mp4")]
    media: String,

    /// Position the host seeks to once everyone is watching
    #[arg(long, default_value = "12.3")]
    seek: f64,

    /// Seconds of shared playback before the host pauses
    #[arg(long, default_value = "3")]
    watch_secs: u64,
}

/// Upper bound for any single step of the script
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(room = %args.room, viewers = args.viewers, "Watch party starting");

    let party = LocalParty::new(config, RoomId::from(args.room.as_str()));

    tokio::select! {
        result = run(&party, &args) => {
            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, leaving the room");
        }
    }

    info!("Watch party finished");
    Ok(())
}

async fn run(party: &LocalParty, args: &Args) -> Result<serde_json::Value> {
    let (host_player, host_events) = SimulatedPlayer::new(AutoplayPolicy::Allow);
    let host = party.host("host", Box::new(host_player), host_events).await?;
    host.load_media(MediaSource::new(args.media.clone())).await?;
    host.start_broadcast().await?;
    host.play()?;

    let mut viewers = Vec::with_capacity(args.viewers);
    for n in 1..=args.viewers {
        let (player, events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let viewer = party
            .viewer(&format!("viewer-{n}"), Box::new(player), events)
            .await?;
        viewers.push(viewer);
    }

    for viewer in &viewers {
        step(viewer.wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)).await?;
        viewer.gesture()?;
    }

    host.seek(args.seek)?;
    tokio::time::sleep(Duration::from_secs(args.watch_secs)).await;
    host.pause()?;

    for viewer in &viewers {
        step(viewer.wait_for(|s| {
            matches!(s.phase, ViewerPhase::Synced(_)) && s.host_state.is_some()
        }))
        .await?;
    }
    // Let the status reports reach the host.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = report(&host, &viewers);
    for viewer in viewers {
        viewer.shutdown().await;
    }
    host.shutdown().await;
    Ok(report)
}

async fn step<T>(fut: impl std::future::Future<Output = watchparty_core::Result<T>>) -> Result<T> {
    let value = tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .context("Timed out waiting for the party to settle")??;
    Ok(value)
}

fn report(host: &HostHandle, viewers: &[ViewerHandle]) -> serde_json::Value {
    let host_snapshot = host.snapshot();
    let roster: Vec<_> = host_snapshot
        .viewers
        .iter()
        .map(|v| {
            json!({
                "id": v.id,
                "display_name": v.display_name,
                "status": v.status,
                "link_id": v.link_id,
            })
        })
        .collect();
    let viewer_reports: Vec<_> = viewers
        .iter()
        .map(|viewer| {
            let s = viewer.snapshot();
            json!({
                "id": s.local_id,
                "phase": format!("{:?}", s.phase),
                "position_seconds": s.position_seconds,
                "muted": s.muted,
            })
        })
        .collect();

    json!({
        "room_id": host_snapshot.room_id,
        "host": {
            "phase": format!("{:?}", host_snapshot.phase),
            "state": host_snapshot.state,
            "position_seconds": host_snapshot.position_seconds,
            "viewers": roster,
        },
        "viewers": viewer_reports,
    })
}
