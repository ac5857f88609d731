//! MusicGen HTTP server.
//!
//! Loads the model once, then serves `POST /generate-music/`.
//!
//! # Usage
//!
//! ```sh
//! # Download Xenova/musicgen-small from the Hub and listen on 0.0.0.0:8000
//! musicgen-server
//!
//! # Use a local export and a fixed seed
//! musicgen-server --model-dir ./musicgen-small --seed 42 --port 9000
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use musicgen_server::{
    config::DEFAULT_MAX_NEW_TOKENS,
    download,
    server::{create_router, AppState, GENERATE_ROUTE},
    MusicGenerator, MusicgenOnnx,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "musicgen-server", about = "Generate music from text prompts over HTTP")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// HuggingFace repository of the ONNX export (ignored with --model-dir)
    #[arg(long, default_value = download::DEFAULT_REPO)]
    model: String,

    /// Directory holding config.json, tokenizer.json and onnx/*.onnx
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Tokens generated per codebook (256 ≈ 5 s of audio)
    #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    max_new_tokens: usize,

    /// Fixed sampling seed for reproducible output (omit for random)
    #[arg(long)]
    seed: Option<u64>,
}

fn load_model(args: &Args) -> anyhow::Result<MusicgenOnnx> {
    let model = match &args.model_dir {
        Some(dir) => {
            info!("Loading model from {}", dir.display());
            MusicgenOnnx::load_from_dir(dir)?
        }
        None => download::load_from_hub(&args.model)?,
    };
    Ok(model.with_max_new_tokens(args.max_new_tokens)?.with_seed(args.seed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "musicgen_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting MusicGen server");

    // Nothing is bound until the model is ready.
    let load_args = args.clone();
    let model = match tokio::task::spawn_blocking(move || load_model(&load_args))
        .await
        .context("model loading task failed")?
    {
        Ok(model) => model,
        Err(e) => {
            error!("Failed to load model: {:#}", e);
            return Err(e);
        }
    };
    info!(
        "Model and processor loaded ({} Hz, {} new tokens per clip)",
        model.sample_rate(),
        model.generation_config().max_new_tokens
    );

    let state = AppState::new(std::sync::Arc::new(model));
    let app = create_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}{}", addr, GENERATE_ROUTE);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
