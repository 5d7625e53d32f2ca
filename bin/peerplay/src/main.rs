use std::{fs::File, io::BufWriter, num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use peerstream::{HttpClient, Origin, SessionOutcome, SessionState, StreamConfig, Streamer};
use url::Url;

use crate::player::{Output, PlayerOptions, SimulatedPlayer};

mod player;

/// Stream an asset from a storage node the way a browser player would.
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct PeerplayArgs {
    /// Base URL of the storage node
    #[clap(long, env = "PEERPLAY_ORIGIN", default_value = "http://127.0.0.1:8080")]
    origin: Url,

    /// Name of the asset to play
    name: String,

    /// Write the received audio to this file instead of stdout
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Streaming configuration in TOML
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Number of segments to split the asset into
    #[clap(long)]
    segments: Option<NonZeroUsize>,

    /// Retry limit for each segment
    #[clap(long)]
    retries: Option<u32>,

    /// Constant bitrate of the asset in kbps, used to derive its duration
    #[clap(long, default_value = "128")]
    bitrate: u32,

    /// Playback speed of the simulated clock
    #[clap(long, default_value = "1.0")]
    speed: f64,

    /// Pretend segmented playback is unsupported and play the file directly
    #[clap(long)]
    unsupported: bool,
}

impl PeerplayArgs {
    fn stream_config(&self) -> anyhow::Result<StreamConfig> {
        let mut config = match &self.config {
            Some(path) => StreamConfig::load(path)?,
            None => StreamConfig::default(),
        };
        if let Some(segments) = self.segments {
            config.segment_count = segments;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        config.validate()?;
        Ok(config)
    }

    fn output(&self) -> anyhow::Result<Output> {
        Ok(match &self.output {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(std::io::stdout()),
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = PeerplayArgs::parse();
    if args.bitrate == 0 || !args.speed.is_finite() || args.speed <= 0. {
        anyhow::bail!("bitrate and speed must be positive");
    }
    let config = args.stream_config()?;

    let client = HttpClient::with_timeout(config.request_timeout())?;
    let origin = Origin::new(client.clone(), args.origin.clone())?;
    let player = SimulatedPlayer::new(
        client,
        args.output()?,
        PlayerOptions {
            bitrate_kbps: args.bitrate,
            speed: args.speed,
            segmented: !args.unsupported,
        },
    );

    let mut streamer = Streamer::new(origin, config, player.clone());
    let handle = streamer.select_asset(&args.name).await;
    let cancel = handle.cancellation();
    let mut state = handle.subscribe();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, stopping.");
                cancel.cancel();
            }
        }
    });

    let direct = matches!(
        state.wait_for(SessionState::is_settled).await.as_deref(),
        Ok(SessionState::DirectPlayback)
    );
    if direct {
        tracing::info!("Playing {} directly.", args.name);
        tokio::select! {
            _ = player.finished() => {}
            _ = cancel.cancelled() => {}
        }
        if let Some(Err(e)) = streamer.stop().await {
            tracing::warn!("Closing {} failed: {e}", args.name);
        }
        return Ok(());
    }

    let Some(outcome) = streamer.wait().await else {
        return Ok(());
    };
    match outcome {
        Ok(SessionOutcome::Closed | SessionOutcome::DirectPlayback) => return Ok(()),
        Ok(SessionOutcome::Completed { bytes_fetched }) => {
            tracing::info!("Fetched all {bytes_fetched} bytes of {}.", args.name);
        }
        Err(e) => {
            tracing::error!("{}", e.alert());
            return Err(e.into());
        }
    }

    tokio::select! {
        _ = player.finished() => {}
        _ = cancel.cancelled() => {}
    }
    Ok(())
}
