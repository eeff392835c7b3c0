//! Embedding catalog: known identities and their reference embeddings.
//!
//! [`CatalogStore`] loads the catalog from a local cache artifact, falls back
//! to the remote object store, and can bootstrap it from a remote hierarchy of
//! labelled images (`<prefix>/<label>/<image>`). Storage failures never
//! propagate out of `load`/`bootstrap`: the service still runs, it just
//! recognizes nobody.

use crate::gateway::{FaceGateway, GatewayError};
use crate::store::{ObjectStore, StoreError};
use crate::types::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Image extensions considered during bootstrap.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

pub const DEFAULT_CATALOG_KEY: &str = "embeddings/known_embeddings.json";
pub const DEFAULT_PEOPLE_PREFIX: &str = "known_people/";

/// Padding around the detected face when cutting a reference crop.
const REFERENCE_PADDING: u32 = 20;
const ARTIFACT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog artifact: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unsupported catalog artifact version {0}")]
    Version(u32),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
    #[error("reference image: {0}")]
    Reference(String),
}

/// One stored reference embedding and the image it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub embedding: Embedding,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownIdentity {
    pub label: String,
    pub references: Vec<Reference>,
}

/// Ordered label → identity mapping. Insertion order is the match order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    identities: Vec<KnownIdentity>,
}

#[derive(Serialize, Deserialize)]
struct Artifact {
    version: u32,
    generated_at: DateTime<Utc>,
    identities: Vec<KnownIdentity>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn identities(&self) -> &[KnownIdentity] {
        &self.identities
    }

    pub fn get(&self, label: &str) -> Option<&KnownIdentity> {
        self.identities.iter().find(|i| i.label == label)
    }

    /// Register `label` with no references if it is not present yet.
    pub fn ensure_identity(&mut self, label: &str) -> &mut KnownIdentity {
        let pos = match self.identities.iter().position(|i| i.label == label) {
            Some(pos) => pos,
            None => {
                self.identities.push(KnownIdentity {
                    label: label.to_string(),
                    references: Vec::new(),
                });
                self.identities.len() - 1
            }
        };
        &mut self.identities[pos]
    }

    /// Append a reference to `label`, creating the identity at the end of the
    /// catalog if needed.
    pub fn add_reference(&mut self, label: &str, embedding: Embedding, source: impl Into<String>) {
        self.ensure_identity(label).references.push(Reference {
            embedding,
            source: source.into(),
        });
    }

    /// Total reference embeddings across all identities.
    pub fn reference_count(&self) -> usize {
        self.identities.iter().map(|i| i.references.len()).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CatalogError> {
        let artifact = Artifact {
            version: ARTIFACT_VERSION,
            generated_at: Utc::now(),
            identities: self.identities.clone(),
        };
        Ok(serde_json::to_vec(&artifact)?)
    }

    /// Parse a serialized artifact. Duplicate labels are merged in order of
    /// first appearance.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CatalogError> {
        let artifact: Artifact = serde_json::from_slice(bytes)?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(CatalogError::Version(artifact.version));
        }

        let mut catalog = Catalog::new();
        for identity in artifact.identities {
            catalog
                .ensure_identity(&identity.label)
                .references
                .extend(identity.references);
        }
        Ok(catalog)
    }
}

/// Loads, saves and bootstraps the catalog against a local cache file and a
/// remote object store.
pub struct CatalogStore {
    store: Arc<dyn ObjectStore>,
    cache_path: PathBuf,
    catalog_key: String,
    people_prefix: String,
}

impl CatalogStore {
    pub fn new(store: Arc<dyn ObjectStore>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            cache_path: cache_path.into(),
            catalog_key: DEFAULT_CATALOG_KEY.to_string(),
            people_prefix: DEFAULT_PEOPLE_PREFIX.to_string(),
        }
    }

    pub fn with_catalog_key(mut self, key: impl Into<String>) -> Self {
        self.catalog_key = key.into();
        self
    }

    /// Prefix of the labelled reference images; normalized to end with `/`.
    pub fn with_people_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.people_prefix = prefix;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Local cache first, then the remote artifact (cached locally on
    /// success), else an empty catalog.
    pub async fn load(&self) -> Catalog {
        match read_cache(&self.cache_path).await {
            Ok(Some(catalog)) => {
                tracing::info!(
                    path = %self.cache_path.display(),
                    identities = catalog.len(),
                    "loaded catalog from local cache"
                );
                return catalog;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %self.cache_path.display(), error = %e, "local catalog cache unreadable, ignoring");
            }
        }

        match self.fetch_remote().await {
            Ok(Some(catalog)) => catalog,
            Ok(None) => {
                tracing::error!(key = %self.catalog_key, "no catalog found in local cache or remote store");
                Catalog::new()
            }
            Err(e) => {
                tracing::error!(key = %self.catalog_key, error = %e, "failed to download catalog");
                Catalog::new()
            }
        }
    }

    async fn fetch_remote(&self) -> Result<Option<Catalog>, CatalogError> {
        if !self.store.exists(&self.catalog_key).await? {
            return Ok(None);
        }

        tracing::info!(key = %self.catalog_key, "local cache missing, downloading catalog");
        let bytes = self.store.get_bytes(&self.catalog_key).await?;
        let catalog = Catalog::from_bytes(&bytes)?;

        if let Err(e) = write_atomic(&self.cache_path, &bytes).await {
            tracing::warn!(path = %self.cache_path.display(), error = %e, "could not write local catalog cache");
        } else {
            tracing::info!(identities = catalog.len(), "downloaded catalog and cached it locally");
        }
        Ok(Some(catalog))
    }

    /// Write the local artifact, then mirror it to the remote store.
    ///
    /// Only the local write can fail the call; remote failures are logged.
    pub async fn save(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        let bytes = catalog.to_bytes()?;
        write_atomic(&self.cache_path, &bytes).await?;
        tracing::info!(path = %self.cache_path.display(), "saved catalog to local cache");

        match self.store.put_bytes(&self.catalog_key, bytes).await {
            Ok(()) => tracing::info!(key = %self.catalog_key, "saved catalog to remote store"),
            Err(e) => tracing::error!(key = %self.catalog_key, error = %e, "failed to upload catalog"),
        }
        Ok(())
    }

    /// [`load`](Self::load), bootstrapping from reference images when that
    /// yields an empty catalog.
    pub async fn load_or_bootstrap(&self, gateway: Arc<dyn FaceGateway>) -> Catalog {
        let catalog = self.load().await;
        if !catalog.is_empty() {
            return catalog;
        }
        self.bootstrap(gateway).await
    }

    /// Build the catalog from `<prefix>/<label>/<image>` objects and save it.
    ///
    /// Only the first detected face of each image is embedded. Images without
    /// a face, or that fail to download or decode, are skipped.
    pub async fn bootstrap(&self, gateway: Arc<dyn FaceGateway>) -> Catalog {
        let keys = match self.store.list_prefix(&self.people_prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(prefix = %self.people_prefix, error = %e, "failed to list reference images");
                return Catalog::new();
            }
        };

        let mut catalog = Catalog::new();
        for key in keys {
            let Some((label, file)) = split_reference_key(&key, &self.people_prefix) else {
                continue;
            };
            let identity = catalog.ensure_identity(label);
            let Some(file) = file else {
                tracing::info!(label, "loading reference images");
                continue;
            };
            if !has_image_extension(file) {
                continue;
            }

            match self.embed_reference(&key, gateway.clone()).await {
                Ok(Some(embedding)) => {
                    tracing::info!(label, key = %key, "embedded reference image");
                    identity.references.push(Reference {
                        embedding,
                        source: file.to_string(),
                    });
                }
                Ok(None) => tracing::warn!(label, key = %key, "no face found in reference image"),
                Err(e) => tracing::error!(label, key = %key, error = %e, "failed to process reference image"),
            }
        }

        for identity in catalog.identities() {
            tracing::info!(
                label = %identity.label,
                references = identity.references.len(),
                "identity loaded"
            );
        }
        tracing::info!(
            identities = catalog.len(),
            references = catalog.reference_count(),
            "finished bootstrapping catalog"
        );

        if let Err(e) = self.save(&catalog).await {
            tracing::error!(error = %e, "failed to save bootstrapped catalog");
        }
        catalog
    }

    /// Embedding of the first face in one reference image; `None` when the
    /// image holds no face.
    async fn embed_reference(
        &self,
        key: &str,
        gateway: Arc<dyn FaceGateway>,
    ) -> Result<Option<Embedding>, CatalogError> {
        let bytes = self.store.get_bytes(key).await?;

        tokio::task::spawn_blocking(move || -> Result<Option<Embedding>, CatalogError> {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| CatalogError::Reference(format!("decode: {e}")))?
                .to_rgb8();
            let boxes = gateway.detect_boxes(&image)?;
            let Some(face) = boxes.first() else {
                return Ok(None);
            };
            let Some((x, y, w, h)) = face.padded_region(REFERENCE_PADDING, image.width(), image.height()) else {
                return Ok(None);
            };
            let crop = image::imageops::crop_imm(&image, x, y, w, h).to_image();
            match gateway.embed(&crop) {
                Ok(embedding) => Ok(Some(embedding)),
                Err(GatewayError::NoFace) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| CatalogError::Reference(format!("embedding task: {e}")))?
    }
}

/// Split `<prefix><label>/<file>` into `(label, Some(file))`, or a folder
/// placeholder `<prefix><label>/` into `(label, None)`.
fn split_reference_key<'a>(key: &'a str, prefix: &str) -> Option<(&'a str, Option<&'a str>)> {
    let rest = key.strip_prefix(prefix)?;
    let (label, file) = rest.split_once('/')?;
    if label.is_empty() {
        return None;
    }
    let file = file.rsplit('/').next().filter(|f| !f.is_empty());
    Some((label, file))
}

fn has_image_extension(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

async fn read_cache(path: &Path) -> Result<Option<Catalog>, CatalogError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(Catalog::from_bytes(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace `path` wholesale: write a sibling temp file, then rename over it.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;
    use crate::types::FaceBox;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a store and counts every call.
    struct CountingStore {
        inner: FsObjectStore,
        calls: AtomicUsize,
        lists: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: FsObjectStore) -> Self {
            Self { inner, calls: AtomicUsize::new(0), lists: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.exists(key).await
        }
        async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_bytes(key).await
        }
        async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.put_bytes(key, bytes).await
        }
        async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list_prefix(prefix).await
        }
    }

    /// Store whose every call fails.
    struct DownStore;

    #[async_trait]
    impl ObjectStore for DownStore {
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Status { status: 503, key: key.into() })
        }
        async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Status { status: 503, key: key.into() })
        }
        async fn put_bytes(&self, key: &str, _bytes: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::Status { status: 503, key: key.into() })
        }
        async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Status { status: 503, key: prefix.into() })
        }
    }

    /// Faces are encoded by the red channel of the top-left pixel: 0 means no
    /// face, anything else is a face whose embedding is `[red, 1.0]`.
    struct PixelGateway;

    impl FaceGateway for PixelGateway {
        fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<FaceBox>, GatewayError> {
            if image.get_pixel(0, 0)[0] == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![FaceBox::new(0.0, 0.0, image.width() as f32, image.height() as f32)])
        }

        fn embed(&self, crop: &RgbImage) -> Result<Embedding, GatewayError> {
            match crop.get_pixel(0, 0)[0] {
                0 => Err(GatewayError::NoFace),
                red => Ok(Embedding::new(vec![red as f32, 1.0])),
            }
        }
    }

    fn png(red: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(16, 16, Rgb([red, 0, 0]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn sample_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_reference("Alice", Embedding::new(vec![1.0, 0.0]), "a1.jpg");
        catalog.add_reference("Bob", Embedding::new(vec![0.0, 1.0]), "b1.jpg");
        catalog.add_reference("Alice", Embedding::new(vec![0.9, 0.1]), "a2.jpg");
        catalog
    }

    #[test]
    fn test_catalog_preserves_insertion_order() {
        let catalog = sample_catalog();
        let labels: Vec<_> = catalog.identities().iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Alice", "Bob"]);
        assert_eq!(catalog.get("Alice").unwrap().references.len(), 2);
        assert_eq!(catalog.reference_count(), 3);
    }

    #[test]
    fn test_artifact_rejects_unknown_version() {
        let bytes = br#"{"version":99,"generated_at":"2024-01-01T00:00:00Z","identities":[]}"#;
        assert!(matches!(Catalog::from_bytes(bytes), Err(CatalogError::Version(99))));
    }

    #[test]
    fn test_artifact_merges_duplicate_labels() {
        let bytes = br#"{"version":1,"generated_at":"2024-01-01T00:00:00Z","identities":[
            {"label":"A","references":[{"embedding":{"values":[1.0]},"source":"1"}]},
            {"label":"B","references":[]},
            {"label":"A","references":[{"embedding":{"values":[2.0]},"source":"2"}]}]}"#;
        let catalog = Catalog::from_bytes(bytes).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("A").unwrap().references.len(), 2);
    }

    #[test]
    fn test_split_reference_key() {
        let p = "known_people/";
        assert_eq!(split_reference_key("known_people/", p), None);
        assert_eq!(split_reference_key("known_people/Alice/", p), Some(("Alice", None)));
        assert_eq!(
            split_reference_key("known_people/Alice/1.jpg", p),
            Some(("Alice", Some("1.jpg")))
        );
        assert_eq!(split_reference_key("known_people/loose.jpg", p), None);
        assert_eq!(split_reference_key("elsewhere/Alice/1.jpg", p), None);
    }

    #[test]
    fn test_image_extension_filter() {
        assert!(has_image_extension("a.JPG"));
        assert!(has_image_extension("a.jpeg"));
        assert!(has_image_extension("a.gif"));
        assert!(!has_image_extension("a.txt"));
        assert!(!has_image_extension("jpg"));
    }

    #[tokio::test]
    async fn test_save_then_load_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path().join("remote")));
        let catalogs = CatalogStore::new(store.clone(), dir.path().join("cache/known.json"));

        catalogs.save(&sample_catalog()).await.unwrap();
        assert!(store.exists(DEFAULT_CATALOG_KEY).await.unwrap());
        assert_eq!(catalogs.load().await, sample_catalog());
    }

    #[tokio::test]
    async fn test_load_downloads_and_caches_remote() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FsObjectStore::new(dir.path().join("remote"));
        remote
            .put_bytes(DEFAULT_CATALOG_KEY, sample_catalog().to_bytes().unwrap())
            .await
            .unwrap();
        let store = Arc::new(CountingStore::new(remote));
        let cache = dir.path().join("known.json");
        let catalogs = CatalogStore::new(store.clone(), &cache);

        let first = catalogs.load().await;
        assert_eq!(first, sample_catalog());
        assert!(cache.exists());
        let calls_after_first = store.calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);

        // Second load is served from the cache without touching the store.
        let second = catalogs.load().await;
        assert_eq!(first, second);
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_load_with_nothing_anywhere_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = CatalogStore::new(Arc::new(DownStore), dir.path().join("known.json"));
        assert!(catalogs.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cache_falls_back_to_remote() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FsObjectStore::new(dir.path().join("remote")));
        remote
            .put_bytes(DEFAULT_CATALOG_KEY, sample_catalog().to_bytes().unwrap())
            .await
            .unwrap();
        let cache = dir.path().join("known.json");
        std::fs::write(&cache, b"not json").unwrap();

        let catalogs = CatalogStore::new(remote, &cache);
        assert_eq!(catalogs.load().await, sample_catalog());
    }

    #[tokio::test]
    async fn test_save_survives_remote_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("known.json");
        let catalogs = CatalogStore::new(Arc::new(DownStore), &cache);

        catalogs.save(&sample_catalog()).await.unwrap();
        assert!(cache.exists());
        assert_eq!(catalogs.load().await, sample_catalog());
    }

    #[tokio::test]
    async fn test_bootstrap_embeds_reference_images() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FsObjectStore::new(dir.path().join("remote")));
        remote.put_bytes("known_people/Alice/1.png", png(10)).await.unwrap();
        remote.put_bytes("known_people/Alice/2.png", png(0)).await.unwrap(); // no face
        remote.put_bytes("known_people/Alice/notes.txt", b"hi".to_vec()).await.unwrap();
        remote.put_bytes("known_people/Bob/1.png", png(20)).await.unwrap();
        remote.put_bytes("known_people/Bob/broken.jpg", b"garbage".to_vec()).await.unwrap();

        let cache = dir.path().join("known.json");
        let catalogs = CatalogStore::new(remote.clone(), &cache);
        let catalog = catalogs.load_or_bootstrap(Arc::new(PixelGateway)).await;

        let labels: Vec<_> = catalog.identities().iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Alice", "Bob"]);

        let alice = catalog.get("Alice").unwrap();
        assert_eq!(alice.references.len(), 1);
        assert_eq!(alice.references[0].source, "1.png");
        assert_eq!(alice.references[0].embedding.values, vec![10.0, 1.0]);
        assert_eq!(catalog.get("Bob").unwrap().references.len(), 1);

        // Persisted both locally and remotely.
        assert!(cache.exists());
        assert!(remote.exists(DEFAULT_CATALOG_KEY).await.unwrap());
        assert_eq!(catalogs.load().await, catalog);
    }

    #[tokio::test]
    async fn test_load_or_bootstrap_prefers_populated_cache() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FsObjectStore::new(dir.path().join("remote"));
        remote.put_bytes("known_people/Carol/c.png", png(5)).await.unwrap();
        let store = Arc::new(CountingStore::new(remote));
        let cache = dir.path().join("known.json");

        CatalogStore::new(Arc::new(FsObjectStore::new(dir.path().join("other"))), &cache)
            .save(&sample_catalog())
            .await
            .unwrap();

        let catalogs = CatalogStore::new(store.clone(), &cache);
        let catalog = catalogs.load_or_bootstrap(Arc::new(PixelGateway)).await;

        assert_eq!(catalog, sample_catalog());
        assert!(catalog.get("Carol").is_none());
        assert_eq!(store.lists.load(Ordering::SeqCst), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_or_bootstrap_bootstraps_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FsObjectStore::new(dir.path().join("remote"));
        remote.put_bytes("known_people/Carol/c.png", png(5)).await.unwrap();
        let store = Arc::new(CountingStore::new(remote));

        let catalogs = CatalogStore::new(store.clone(), dir.path().join("known.json"));
        let catalog = catalogs.load_or_bootstrap(Arc::new(PixelGateway)).await;

        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.get("Carol").unwrap().references.len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_custom_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FsObjectStore::new(dir.path().join("remote")));
        remote.put_bytes("people/Carol/c.png", png(5)).await.unwrap();

        let catalogs = CatalogStore::new(remote, dir.path().join("known.json")).with_people_prefix("people");
        let catalog = catalogs.bootstrap(Arc::new(PixelGateway)).await;
        assert_eq!(catalog.get("Carol").unwrap().references.len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_with_store_down_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = CatalogStore::new(Arc::new(DownStore), dir.path().join("known.json"));
        assert!(catalogs.bootstrap(Arc::new(PixelGateway)).await.is_empty());
    }
}
