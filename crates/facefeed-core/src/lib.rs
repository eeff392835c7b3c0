//! facefeed-core: face recognition building blocks.
//!
//! Embedding catalog with local cache and remote store, first-match cosine
//! matcher, the face detection/embedding gateway (SCRFD + ArcFace via ONNX
//! Runtime) and frame annotation.

pub mod alignment;
pub mod annotate;
pub mod catalog;
pub mod detector;
pub mod gateway;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use catalog::{Catalog, CatalogStore, KnownIdentity, Reference};
pub use gateway::{FaceGateway, GatewayError, OnnxGateway};
pub use matcher::{BestMatch, FirstMatch, Matcher, DEFAULT_THRESHOLD};
pub use store::{FsObjectStore, GcsObjectStore, ObjectStore, StoreError, StoreLocation};
pub use types::{Embedding, FaceBox, Label, Landmarks, RecognitionResult};
