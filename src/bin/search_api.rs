use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use visual_search::config::{self, EncoderArgs, DEFAULT_VECTORS_PATH};
use visual_search::service::{DEFAULT_MAX_TOP_K, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TOP_K};
use visual_search::{router, ClipEncoder, SearchContext, SearchLimits};

#[derive(Parser, Debug)]
#[command(
    name = "visual-search-api",
    about = "HTTP API returning the products most similar to an uploaded image"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "VISUAL_SEARCH_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Vector table produced by the vectorizer.
    #[arg(long, env = "VECTORS_PATH", default_value = DEFAULT_VECTORS_PATH)]
    vectors: PathBuf,

    /// Matches returned when the client does not pass `top_k`.
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    default_top_k: usize,

    /// Maximum `top_k` allowed per request.
    #[arg(long, default_value_t = DEFAULT_MAX_TOP_K)]
    max_top_k: usize,

    /// Largest accepted request body in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    #[command(flatten)]
    encoder: EncoderArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    config::init_logging();
    let cli = ApiCli::parse();

    let weights = cli.encoder.weights_source();
    let encoder = tokio::task::spawn_blocking(move || ClipEncoder::load(&weights))
        .await
        .context("encoder loading task panicked")??;
    let limits = SearchLimits::new(cli.default_top_k, cli.max_top_k);
    let context = Arc::new(SearchContext::from_path(
        Arc::new(encoder),
        &cli.vectors,
        limits,
    ));
    if !context.is_ready() {
        tracing::warn!("starting without a search index; /api/search will return errors");
    }
    let app = router(context, cli.max_upload_bytes);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("visual-search-api listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
