//! Command-line and environment options shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::encoder::clip::{WeightsSource, DEFAULT_MODEL_ID, DEFAULT_MODEL_REVISION};

/// Default location of the vector table.
pub const DEFAULT_VECTORS_PATH: &str = "data/vectors.json";

/// Options selecting the CLIP weights.
#[derive(Args, Debug, Clone)]
pub struct EncoderArgs {
    /// Hugging Face model id holding the CLIP weights
    #[arg(long, env = "VISUAL_SEARCH_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Git revision of the model repository
    #[arg(long, env = "VISUAL_SEARCH_MODEL_REVISION", default_value = DEFAULT_MODEL_REVISION)]
    pub model_revision: String,

    /// Local safetensors file; skips the hub download when set
    #[arg(long, env = "VISUAL_SEARCH_WEIGHTS")]
    pub weights: Option<PathBuf>,
}

impl EncoderArgs {
    /// Converts the options into a weights source.
    pub fn weights_source(&self) -> WeightsSource {
        match &self.weights {
            Some(path) => WeightsSource::File(path.clone()),
            None => WeightsSource::Hub {
                model_id: self.model_id.clone(),
                revision: self.model_revision.clone(),
            },
        }
    }
}

/// Maps a seconds option to a timeout, `0` meaning no timeout.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Installs the global `tracing` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
