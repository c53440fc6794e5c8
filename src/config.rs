use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Name of the single cache store. Also the directory name used on disk.
pub const CACHE_NAME: &str = "tile-cache";

/// URL substrings that mark a request as tile-like. Matching is a plain,
/// case-sensitive `contains`.
pub const TILE_MARKERS: &[&str] = &["cartocdn", "openstreetmap", "tile"];

/// Directory name under the platform cache dir for the default store location.
const APP_NAME: &str = "tile-cache-proxy";

/// Configuration for the hosting proxy. The interceptor itself only uses the
/// constants above.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the listener binds to. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// Root directory for the disk store. `None` keeps entries in memory.
    pub cache_dir: Option<PathBuf>,
    /// Optional upstream client timeout in seconds.
    pub upstream_timeout_secs: Option<u64>,
    /// Whether the upstream client follows redirects.
    pub follow_redirects: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cache_dir: dirs::cache_dir().map(|dir| dir.join(APP_NAME)),
            upstream_timeout_secs: None,
            follow_redirects: true,
        }
    }
}

impl ProxyConfig {
    /// Config that keeps the store in memory. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            cache_dir: None,
            ..Self::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
