use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tile_cache_proxy::api::{init_tracing, TileProxy};
use tile_cache_proxy::config::ProxyConfig;

#[derive(Parser, Debug)]
#[command(name = "tile-cache-proxy", version, about = "Cache-first local proxy for map tiles")]
struct Args {
    /// JSON config file. Flags given on the command line override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory holding the tile store.
    #[arg(long, conflicts_with = "memory")]
    cache_dir: Option<PathBuf>,

    /// Keep the store in memory only.
    #[arg(long)]
    memory: bool,
}

impl Args {
    fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_file(path)?,
            None => ProxyConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(dir) = self.cache_dir {
            config.cache_dir = Some(dir);
        }
        if self.memory {
            config.cache_dir = None;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Args::parse().into_config()?;
    let proxy = TileProxy::start(config).await?;
    info!("route tiles through {}/<tile url>", proxy.url());

    tokio::signal::ctrl_c().await?;

    let stats = proxy.stats();
    info!(
        "served hits={} misses={} fetches={} stored={} unresolved={} bypassed={}",
        stats.cache_hits,
        stats.cache_misses,
        stats.upstream_fetches,
        stats.stored,
        stats.unresolved,
        stats.bypassed
    );
    proxy.shutdown();
    Ok(())
}
