// Cache-first interceptor — classifies each request and runs the tile policy.
//
// Per tile-like request:
//   lookup hit                      -> ServedFromCache
//   miss -> fetch -> cacheable      -> ServedFresh (write spawned)
//   miss -> fetch -> not cacheable  -> ServedFreshUncached
//   miss -> fetch fails             -> Unresolved
// Nothing here returns an error to the caller.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::request::TileRequest;
use super::response::TileResponse;
use super::stats::StatsCollector;
use super::store::CacheStore;
use crate::config::TILE_MARKERS;
use crate::source::traits::Upstream;

/// Tile-like iff the URL contains one of the markers anywhere, case-sensitive.
/// Query strings and unrelated path segments count too.
pub fn is_tile_request(url: &str) -> bool {
    TILE_MARKERS.iter().any(|marker| url.contains(marker))
}

/// Result of offering a request to the interceptor.
#[derive(Debug)]
pub enum Interception {
    /// Not tile-like. The caller should use the default network path.
    Bypass,
    Handled(Outcome),
}

/// Terminal state of one tile-like request.
#[derive(Debug)]
pub enum Outcome {
    ServedFromCache(TileResponse),
    /// Fresh response; its duplicate is being written by `cache_write`.
    ServedFresh {
        response: TileResponse,
        cache_write: JoinHandle<()>,
    },
    ServedFreshUncached(TileResponse),
    /// The fetch failed and nothing was cached. No response exists.
    Unresolved,
}

impl Outcome {
    pub fn response(&self) -> Option<&TileResponse> {
        match self {
            Outcome::ServedFromCache(response)
            | Outcome::ServedFresh { response, .. }
            | Outcome::ServedFreshUncached(response) => Some(response),
            Outcome::Unresolved => None,
        }
    }

    /// Hand the response to the caller. A queued cache write keeps running.
    pub fn into_response(self) -> Option<TileResponse> {
        match self {
            Outcome::ServedFromCache(response)
            | Outcome::ServedFresh { response, .. }
            | Outcome::ServedFreshUncached(response) => Some(response),
            Outcome::Unresolved => None,
        }
    }

    pub fn state(&self) -> &'static str {
        match self {
            Outcome::ServedFromCache(_) => "served_from_cache",
            Outcome::ServedFresh { .. } => "served_fresh",
            Outcome::ServedFreshUncached(_) => "served_fresh_uncached",
            Outcome::Unresolved => "unresolved",
        }
    }
}

pub struct Interceptor {
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn CacheStore>,
    stats: Arc<StatsCollector>,
}

impl Interceptor {
    pub fn new(upstream: Arc<dyn Upstream>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            upstream,
            store,
            stats: Arc::new(StatsCollector::new()),
        }
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    /// Entry point, called once per outbound request.
    pub async fn intercept(&self, request: &TileRequest) -> Interception {
        if !is_tile_request(&request.url) {
            self.stats.record_bypass();
            return Interception::Bypass;
        }
        Interception::Handled(self.handle_tile(request).await)
    }

    /// Cache-first policy for a request already classified as tile-like.
    pub async fn handle_tile(&self, request: &TileRequest) -> Outcome {
        if let Some(cached) = self.lookup(request).await {
            self.stats.record_hit();
            debug!("cache hit {}", request.url);
            return Outcome::ServedFromCache(cached);
        }
        self.stats.record_miss();

        let Some(response) = self.fetch(request).await else {
            self.stats.record_unresolved();
            return Outcome::Unresolved;
        };

        if !Self::validate(&response) {
            self.stats.record_uncached();
            trace!(
                "not caching {} status={} type={}",
                request.url,
                response.status.as_u16(),
                response.response_type.as_str()
            );
            return Outcome::ServedFreshUncached(response);
        }

        let cache_write = self.persist(request, &response);
        Outcome::ServedFresh {
            response,
            cache_write,
        }
    }

    /// Store lookup. A failing store reads as a miss.
    async fn lookup(&self, request: &TileRequest) -> Option<TileResponse> {
        match self.store.lookup(request).await {
            Ok(found) => found,
            Err(e) => {
                debug!("cache lookup failed for {}: {}", request.url, e);
                None
            }
        }
    }

    /// Single upstream attempt. Failures are swallowed here.
    pub async fn fetch(&self, request: &TileRequest) -> Option<TileResponse> {
        self.stats.record_fetch();
        match self.upstream.fetch(request).await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!("fetch failed for {}: {:#}", request.url, e);
                None
            }
        }
    }

    /// Whether a fetched response may enter the store.
    pub fn validate(response: &TileResponse) -> bool {
        response.is_cacheable()
    }

    /// Spawn the write of a duplicate of `response`. The caller never waits on
    /// the returned handle; tests may.
    pub fn persist(&self, request: &TileRequest, response: &TileResponse) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let request = request.clone();
        let copy = response.duplicate();
        tokio::spawn(async move {
            match store.put(&request, copy).await {
                Ok(()) => {
                    stats.record_stored();
                    debug!("cached {}", request.url);
                }
                Err(e) => {
                    stats.record_store_failure();
                    debug!("cache write failed for {}: {}", request.url, e);
                }
            }
        })
    }
}
