use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use visual_search::catalog::mongo::{DEFAULT_COLLECTION, DEFAULT_DATABASE};
use visual_search::config::{self, EncoderArgs, DEFAULT_VECTORS_PATH};
use visual_search::{
    ClipEncoder, HttpImageFetcher, JsonlCatalog, MongoCatalog, ProductSource, Vectorizer,
};

#[derive(Parser, Debug)]
#[command(
    name = "visual-search-vectorizer",
    about = "Embeds every product's primary image and writes the vector table"
)]
struct VectorizeCli {
    /// MongoDB connection string (mongodb://...)
    #[arg(long, env = "MONGO_URI")]
    mongo_uri: Option<String>,

    /// Database holding the products collection
    #[arg(long, env = "MONGO_DB", default_value = DEFAULT_DATABASE)]
    mongo_db: String,

    /// Products collection name
    #[arg(long, env = "MONGO_COLLECTION", default_value = DEFAULT_COLLECTION)]
    mongo_collection: String,

    /// Read products from a JSONL export instead of MongoDB (takes precedence over MONGO_URI)
    #[arg(long, env = "VISUAL_SEARCH_CATALOG")]
    catalog_file: Option<PathBuf>,

    /// Destination of the vector table
    #[arg(long, env = "VECTORS_PATH", default_value = DEFAULT_VECTORS_PATH)]
    output: PathBuf,

    /// Seconds before an image download times out (0 disables the timeout)
    #[arg(long, env = "VISUAL_SEARCH_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    fetch_timeout_secs: u64,

    #[command(flatten)]
    encoder: EncoderArgs,
}

fn main() -> Result<()> {
    config::init_logging();
    let cli = VectorizeCli::parse();

    let mut source = open_source(&cli)?;
    let encoder = ClipEncoder::load(&cli.encoder.weights_source())?;
    let fetcher = HttpImageFetcher::new(config::timeout_from_secs(cli.fetch_timeout_secs))?;

    let (table, report) = Vectorizer::new(&encoder, &fetcher).run(source.as_mut())?;
    table
        .write(&cli.output)
        .with_context(|| format!("failed to write vector table {:?}", cli.output))?;

    tracing::info!(
        path = %cli.output.display(),
        rows = table.len(),
        failed = report.failed,
        "vector table written"
    );
    if report.embedded == 0 {
        tracing::warn!("no products were embedded; the search API will start without an index");
    }
    Ok(())
}

fn open_source(cli: &VectorizeCli) -> Result<Box<dyn ProductSource>> {
    if let Some(path) = &cli.catalog_file {
        return Ok(Box::new(JsonlCatalog::new(path.clone())));
    }
    let uri = cli
        .mongo_uri
        .as_deref()
        .context("MONGO_URI (or --catalog-file) is required")?;
    let catalog = MongoCatalog::connect(uri, &cli.mongo_db, &cli.mongo_collection)?;
    Ok(Box::new(catalog))
}
