use anyhow::Context;
use clap::Parser;
use photomap::server::{router, AppState};
use photomap::{AofBackend, Config, FsImageSource, ImageCache, Store, TileMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Serve an interactive map of geotagged photos", long_about = None)]
struct Args {
    /// Listen address.
    #[arg(short, long, default_value = "127.0.0.1:6677")]
    addr: String,

    /// Directory holding the image cache.
    #[arg(long, default_value = "photomap-cache")]
    cache_dir: PathBuf,

    /// Optional JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Photo directories to index.
    #[arg(required = true)]
    roots: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photomap=info,info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_json(
            &std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?,
        )?,
        None => Config::default(),
    };

    std::fs::create_dir_all(&args.cache_dir)?;
    let backend = AofBackend::open(args.cache_dir.join("imagecache.aof"))
        .context("open image cache store")?;
    let store = Store::new(Box::new(backend));

    let source = Arc::new(FsImageSource::new(&args.roots)?);
    let cache =
        Arc::new(ImageCache::new(source, store, &config).context("warm image cache")?);
    let tiles = TileMap::new(cache.clone(), &config).context("build tile indexes")?;

    let start = tiles.find_start_location();
    info!(
        "serving {} photos, map opens at {:.4}, {:.4}",
        cache.images().len(),
        start.lat,
        start.long
    );

    let state = Arc::new(AppState::new(tiles, cache.clone())?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    info!("listening on {}", args.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl_c");
        })
        .await?;

    cache.close()?;
    Ok(())
}
