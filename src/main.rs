use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::{info, warn};

use waav_conversation::{
    AppConfig, logging,
    core::{
        audio::{AudioSink, AudioSource, FakeAudioSink, FakeAudioSource, Microphone, Speakers},
        conversation::{OrchestratorOptions, TurnOrchestrator},
        realtime::{
            DuplexConnector, LoopbackConnector, RealtimeConversationClient, WebSocketConnector,
        },
    },
};

/// WaaV Conversation - half-duplex voice sessions with a realtime speech service
#[derive(Parser, Debug)]
#[command(name = "waav-conversation")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Use fake audio I/O and a loopback remote, stopping after the first turn
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Realtime model to use (overrides OPENAI_REALTIME_MODEL)
    #[arg(long = "model", value_name = "MODEL")]
    model: Option<String>,

    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        AppConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        AppConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    logging::init(config.log_level);

    let model = cli
        .model
        .clone()
        .unwrap_or_else(|| config.realtime_model.clone());
    let session = config.session_configuration();

    let connector: Arc<dyn DuplexConnector> = if cli.dry_run {
        Arc::new(LoopbackConnector::new())
    } else {
        Arc::new(
            WebSocketConnector::new(config.openai_api_key.clone(), model.clone())
                .with_base_url(config.realtime_url.clone()),
        )
    };
    info!(remote = %connector.describe(), model = %model, "Realtime connector ready");

    let (source, sink): (Arc<dyn AudioSource>, Arc<dyn AudioSink>) = if cli.dry_run {
        info!("Using fake audio I/O");
        (
            Arc::new(FakeAudioSource::new()),
            Arc::new(FakeAudioSink::new()),
        )
    } else {
        info!("Using real audio I/O");
        let playback_rate = session.output_audio_format.sample_rate();
        if session.input_audio_format.sample_rate() != config.audio_sample_rate {
            warn!(
                capture_rate = config.audio_sample_rate,
                expected_rate = session.input_audio_format.sample_rate(),
                input_format = %session.input_audio_format,
                "Capture rate differs from the session input format"
            );
        }
        (
            Arc::new(Microphone::new(config.audio_sample_rate)),
            Arc::new(Speakers::new(playback_rate)),
        )
    };

    let client = RealtimeConversationClient::new(connector, session)
        .with_commit_debounce(config.commit_debounce());

    let options = OrchestratorOptions::default().auto_stop(cli.dry_run);
    let mut orchestrator = TurnOrchestrator::new(Box::new(client), source, sink, options);

    orchestrator.start().await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down...");
            orchestrator.stop().await?;
        }
        _ = orchestrator.stopped() => {}
    }

    Ok(())
}
