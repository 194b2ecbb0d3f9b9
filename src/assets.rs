//! Schema asset materialization.
//!
//! Walks a schema document, fetches every remotely hosted image (selector
//! option icons, reference images) exactly once per logical identity, writes
//! it to the local image store, and rewrites the schema with stable
//! `file://` handles. Per-image failures are recoverable: the remote URL
//! stays in place and the sync continues.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::ImageMaterializeError;
use crate::schema::{value_key, Field, FieldIndex, FieldType, FormSchema, ImageRef};
use crate::store::sanitize;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches raw image bytes from a remote URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher with an explicit timeout; a timeout is just a fetch failure.
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(FETCH_TIMEOUT).build()?,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("HTTP {} fetching {}", resp.status(), url));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Local file materializer: (directory, filename) → stable local handle,
/// with an existence check before every write.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create image cache directory {dir:?}"))?;
        Ok(Self { dir })
    }

    pub fn uri_for(&self, filename: &str) -> String {
        format!("file://{}", self.dir.join(filename).display())
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.dir.join(filename).exists()
    }

    /// Write bytes under `filename` unless already present; either way the
    /// returned handle is stable for that filename.
    pub async fn store(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        let path = self.dir.join(filename);
        if !path.exists() {
            tokio::fs::write(&path, bytes)
                .await
                .with_context(|| format!("failed to write image {path:?}"))?;
            debug!("ImageStore: wrote '{}' ({} bytes)", filename, bytes.len());
        }
        Ok(self.uri_for(filename))
    }
}

/// Output of one materialization pass.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Deep copy of the input schema with `localUri` handles filled in.
    pub schema: FormSchema,
    /// Field index built during the same traversal.
    pub field_index: FieldIndex,
    /// Field names that appeared more than once (later occurrence wins).
    pub collisions: Vec<String>,
    /// Per-image failures; the remote URL was left in place for each.
    pub failures: Vec<ImageMaterializeError>,
}

pub struct AssetCache {
    fetcher: Arc<dyn ImageFetcher>,
    store: ImageStore,
}

impl AssetCache {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, store: ImageStore) -> Self {
        Self { fetcher, store }
    }

    /// Materialize every image in the schema. Never mutates the caller's
    /// schema; never fails the pass as a whole. Running this twice on an
    /// already-materialized schema issues no fetches: a populated `localUri`
    /// or an existing cache file short-circuits the download.
    pub async fn materialize(&self, schema: &FormSchema) -> Materialized {
        let mut schema = schema.clone();
        let mut field_index = FieldIndex::new();
        let mut collisions = Vec::new();
        let mut failures = Vec::new();

        for section in &mut schema.sections {
            for field in &mut section.fields {
                self.materialize_field(field, &mut failures).await;
                index_field(field, &mut field_index, &mut collisions);
            }
        }
        for typedef in schema.types.values_mut() {
            for field in &mut typedef.fields {
                self.materialize_field(field, &mut failures).await;
                index_field(field, &mut field_index, &mut collisions);
            }
        }

        if !collisions.is_empty() {
            warn!("duplicate field names in schema: {:?}", collisions);
        }

        Materialized {
            schema,
            field_index,
            collisions,
            failures,
        }
    }

    async fn materialize_field(
        &self,
        field: &mut Field,
        failures: &mut Vec<ImageMaterializeError>,
    ) {
        if field.field_type == FieldType::CustomSelector {
            let field_name = field.name.clone();
            if let Some(options) = field.options.as_mut() {
                for option in options.items_mut() {
                    let option_key = value_key(&option.value);
                    if let Some(icon) = option.icon.as_mut() {
                        let filename = image_filename(&field_name, &option_key);
                        self.cache_image(icon, &filename, failures).await;
                    }
                }
            }
        }

        if let Some(ref_img) = field.ref_img.as_mut() {
            let filename = image_filename(&field.name, "ref");
            self.cache_image(ref_img, &filename, failures).await;
        }
    }

    async fn cache_image(
        &self,
        image: &mut ImageRef,
        filename: &str,
        failures: &mut Vec<ImageMaterializeError>,
    ) {
        if image.local_uri.is_some() {
            return;
        }
        let Some(url) = image.url.clone() else {
            return;
        };

        if self.store.exists(filename) {
            debug!("image '{}' already cached, reusing", filename);
            image.local_uri = Some(self.store.uri_for(filename));
            return;
        }

        match self.fetch_and_store(&url, filename).await {
            Ok(uri) => image.local_uri = Some(uri),
            Err(e) => {
                warn!("image materialization failed for {}: {:#}", url, e);
                failures.push(ImageMaterializeError {
                    url,
                    filename: filename.to_string(),
                    reason: format!("{e:#}"),
                });
            }
        }
    }

    async fn fetch_and_store(&self, url: &str, filename: &str) -> Result<String> {
        let bytes = self.fetcher.fetch(url).await?;
        image::load_from_memory(&bytes).context("downloaded bytes are not a decodable image")?;
        self.store.store(filename, &bytes).await
    }
}

/// Deterministic cache identity: (field name, option value) or
/// (field name, "ref"), path-sanitized.
fn image_filename(field_name: &str, suffix: &str) -> String {
    format!("{}_{}.png", sanitize(field_name), sanitize(suffix))
}

fn index_field(field: &Field, index: &mut FieldIndex, collisions: &mut Vec<String>) {
    if index.insert(field.name.clone(), field.clone()).is_some() {
        collisions.push(field.name.clone());
    }
}
