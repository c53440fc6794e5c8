use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::config::ProxyConfig;
use crate::engine::interceptor::Interceptor;
use crate::engine::stats::StatsSnapshot;
use crate::engine::store::{CacheStore, DiskStore, MemoryStore};
use crate::server::handler::ProxyServer;
use crate::source::http_source::HttpUpstream;
use crate::source::traits::Upstream;

/// A running proxy: listener, interceptor and store.
pub struct TileProxy {
    server: ProxyServer,
}

impl TileProxy {
    /// Build the HTTP upstream and the store described by `config`, then listen.
    pub async fn start(config: ProxyConfig) -> Result<Self> {
        let upstream = HttpUpstream::with_options(
            config.upstream_timeout_secs.map(Duration::from_secs),
            config.follow_redirects,
        )?;

        let store: Arc<dyn CacheStore> = match &config.cache_dir {
            Some(dir) => {
                let store = DiskStore::open(dir);
                info!("tile store at {}", store.root().display());
                Arc::new(store)
            }
            None => {
                info!("tile store in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_parts(config.listen_addr, Arc::new(upstream), store).await
    }

    /// Start with caller-supplied collaborators.
    pub async fn with_parts(
        listen_addr: SocketAddr,
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        let interceptor = Arc::new(Interceptor::new(upstream, store));
        let server = ProxyServer::start(listen_addr, interceptor).await?;
        Ok(Self { server })
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    /// Base URL of the listener, without trailing slash.
    pub fn url(&self) -> String {
        format!("http://{}", self.server.addr())
    }

    /// Proxy URL for an upstream tile URL.
    pub fn url_for(&self, target: &str) -> String {
        self.server.url_for(target)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.server.interceptor().stats().snapshot()
    }

    pub fn shutdown(self) {
        self.server.shutdown();
    }
}
