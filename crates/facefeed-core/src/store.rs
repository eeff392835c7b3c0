//! Object storage for the embedding catalog and the labelled reference images.
//!
//! Keys are `/`-separated paths. Listing returns every key under a prefix in
//! lexicographic order; "folder" placeholders are keys ending in `/`.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("store returned HTTP {status} for {key}")]
    Status { status: u16, key: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
}

/// Minimal remote object store contract used by the catalog.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Where reference images and the catalog artifact live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A local directory tree.
    Fs(PathBuf),
    /// A Google Cloud Storage bucket.
    Gcs(String),
}

impl StoreLocation {
    /// Parse `fs:<path>` or `gcs:<bucket>`. A bare value is taken as a path.
    pub fn parse(value: &str) -> Option<Self> {
        match value.split_once(':') {
            Some(("fs", path)) if !path.is_empty() => Some(Self::Fs(PathBuf::from(path))),
            Some(("gcs", bucket)) if !bucket.is_empty() => Some(Self::Gcs(bucket.to_string())),
            Some(_) => None,
            None if !value.is_empty() => Some(Self::Fs(PathBuf::from(value))),
            None => None,
        }
    }

    /// Open the store. `token` is only used for GCS.
    pub fn open(&self, token: Option<String>) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let store: Arc<dyn ObjectStore> = match self {
            Self::Fs(root) => Arc::new(FsObjectStore::new(root.clone())),
            Self::Gcs(bucket) => Arc::new(GcsObjectStore::new(bucket.clone(), token)?),
        };
        Ok(store)
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fs(root) => write!(f, "fs:{}", root.display()),
            Self::Gcs(bucket) => write!(f, "gcs:{bucket}"),
        }
    }
}

/// Object store backed by a local directory tree (a mounted bucket, or a
/// plain folder of `<label>/<image>` files).
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path below the root, refusing anything that escapes it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key.trim_end_matches('/'));
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let mut keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if root.is_dir() {
                walk(&root, "", &mut keys)?;
            }
            Ok::<_, std::io::Error>(keys)
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        keys.retain(|k| k.starts_with(&prefix));
        keys.sort();
        Ok(keys)
    }
}

/// Collect keys below `dir`; directories are reported with a trailing `/`.
fn walk(dir: &Path, base: &str, keys: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{base}{name}");
        if entry.file_type()?.is_dir() {
            let folder = format!("{key}/");
            keys.push(folder.clone());
            walk(&entry.path(), &folder, keys)?;
        } else {
            keys.push(key);
        }
    }
    Ok(())
}

const GCS_DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Google Cloud Storage (and Firebase Storage) bucket over the JSON API.
pub struct GcsObjectStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ListItem {
    name: String,
}

impl GcsObjectStore {
    pub fn new(bucket: impl Into<String>, token: Option<String>) -> Result<Self, StoreError> {
        Self::with_endpoint(GCS_DEFAULT_ENDPOINT, bucket, token)
    }

    /// Point the store at a different API root (an emulator, for instance).
    pub fn with_endpoint(
        endpoint: &str,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint).map_err(|_| StoreError::InvalidKey(endpoint.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            bucket: bucket.into(),
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidKey(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Metadata/media URL of one object; the key becomes a single encoded segment.
    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        self.url(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, self.object_url(key)?)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(StoreError::Status { status: s.as_u16(), key: key.to_string() }),
        }
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
            s if s.is_success() => Ok(resp.bytes().await?.to_vec()),
            s => Err(StoreError::Status { status: s.as_u16(), key: key.to_string() }),
        }
    }

    async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        let resp = self
            .request(reqwest::Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Status { status: resp.status().as_u16(), key: key.to_string() });
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let resp = self.request(reqwest::Method::GET, url).send().await?;
            if !resp.status().is_success() {
                return Err(StoreError::Status { status: resp.status().as_u16(), key: prefix.to_string() });
            }
            let page: ListPage = resp.json().await?;
            keys.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
