// Cache store abstraction with an in-memory and an on-disk backend.
//
// Both backends follow the same matching rules: only GET requests are ever
// stored or matched, keys are method + URL without fragment, and a stored
// `Vary` header pins the listed request headers to their values at put time.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::request::{RequestKey, TileRequest};
use super::response::{ResponseType, TileResponse};
use crate::config::CACHE_NAME;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("only GET requests can be cached, got {0}")]
    MethodNotAllowed(String),

    #[error("partial content responses cannot be cached")]
    PartialContent,

    #[error("responses with `Vary: *` cannot be cached")]
    VaryWildcard,

    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Keyed response store. Implementations must make `put` atomic per key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the stored response matching `request`, if any.
    async fn lookup(&self, request: &TileRequest) -> Result<Option<TileResponse>, StoreError>;

    /// Store `response` under the identity of `request`, replacing any entry.
    async fn put(&self, request: &TileRequest, response: TileResponse) -> Result<(), StoreError>;
}

/// Request header values captured for each field named in the response's `Vary`.
type VarySnapshot = Vec<(String, Option<String>)>;

fn check_put(request: &TileRequest, response: &TileResponse) -> Result<VarySnapshot, StoreError> {
    if request.method != Method::GET {
        return Err(StoreError::MethodNotAllowed(request.method.to_string()));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(StoreError::PartialContent);
    }
    let fields = response.vary_fields();
    if fields.iter().any(|field| field == "*") {
        return Err(StoreError::VaryWildcard);
    }
    Ok(fields
        .into_iter()
        .map(|field| {
            let value = request.header_str(&field).map(str::to_string);
            (field, value)
        })
        .collect())
}

fn vary_matches(snapshot: &VarySnapshot, request: &TileRequest) -> bool {
    snapshot
        .iter()
        .all(|(field, value)| request.header_str(field) == value.as_deref())
}

struct MemoryEntry {
    response: TileResponse,
    vary: VarySnapshot,
}

/// Process-local store. Entries live as long as the store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<RequestKey, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether an entry exists for the request's key, ignoring `Vary`.
    pub fn contains(&self, request: &TileRequest) -> bool {
        self.entries.read().contains_key(&request.key())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn lookup(&self, request: &TileRequest) -> Result<Option<TileResponse>, StoreError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let entries = self.entries.read();
        Ok(entries
            .get(&request.key())
            .filter(|entry| vary_matches(&entry.vary, request))
            .map(|entry| entry.response.duplicate()))
    }

    async fn put(&self, request: &TileRequest, response: TileResponse) -> Result<(), StoreError> {
        let vary = check_put(request, &response)?;
        self.entries
            .write()
            .insert(request.key(), MemoryEntry { response, vary });
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    method: String,
    url: String,
    status: u16,
    response_type: ResponseType,
    headers: Vec<(String, String)>,
    vary: VarySnapshot,
    /// Hex sha256 of the body file this metadata was written with.
    body_sha256: String,
}

/// Distinguishes temp files of concurrent writers to the same key.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Store persisted under `<base>/tile-cache/`. The directory is created on the
/// first `put`. Each entry is a `<digest>.json` metadata file next to a
/// `<digest>.body` file; both are written to a temp name and renamed into
/// place, body first. Concurrent writers to one key can interleave the two
/// renames, so the metadata records the body hash and a lookup whose body
/// does not match it is a miss.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open the store under `base_dir`. Does not touch the filesystem.
    pub fn open(base_dir: impl AsRef<Path>) -> Self {
        Self {
            root: base_dir.as_ref().join(CACHE_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_path(&self, key: &RequestKey) -> PathBuf {
        self.root.join(format!("{}.json", key.digest()))
    }

    fn body_path(&self, key: &RequestKey) -> PathBuf {
        self.root.join(format!("{}.body", key.digest()))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}-{}", std::process::id(), seq));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn pairs_to_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        headers.append(name, value);
    }
    headers
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn lookup(&self, request: &TileRequest) -> Result<Option<TileResponse>, StoreError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let key = request.key();

        let Some(raw_meta) = read_optional(&self.meta_path(&key)).await? else {
            return Ok(None);
        };
        let meta: StoredMeta = serde_json::from_slice(&raw_meta)?;
        if meta.method != key.method() || meta.url != key.url() {
            debug!("digest collision for {}, treating as miss", key.url());
            return Ok(None);
        }
        if !vary_matches(&meta.vary, request) {
            return Ok(None);
        }

        let Some(body) = read_optional(&self.body_path(&key)).await? else {
            return Ok(None);
        };
        if body_digest(&body) != meta.body_sha256 {
            debug!("body of {} belongs to another write, treating as miss", key.url());
            return Ok(None);
        }
        let status = match StatusCode::from_u16(meta.status) {
            Ok(status) => status,
            Err(_) => return Ok(None),
        };

        Ok(Some(TileResponse::new(
            status,
            pairs_to_headers(&meta.headers),
            Bytes::from(body),
            meta.response_type,
        )))
    }

    async fn put(&self, request: &TileRequest, response: TileResponse) -> Result<(), StoreError> {
        let vary = check_put(request, &response)?;
        let key = request.key();

        tokio::fs::create_dir_all(&self.root).await?;

        let meta = StoredMeta {
            method: key.method().to_string(),
            url: key.url().to_string(),
            status: response.status.as_u16(),
            response_type: response.response_type,
            headers: headers_to_pairs(&response.headers),
            vary,
            body_sha256: body_digest(&response.body),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        self.write_atomic(&self.body_path(&key), &response.body).await?;
        self.write_atomic(&self.meta_path(&key), &meta_json).await?;
        Ok(())
    }
}
