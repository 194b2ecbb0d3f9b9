//! Offline-first schema synchronization.
//!
//! One synchronizer per form domain. A sync pass surfaces the cached bundle
//! immediately, fetches the remote document, and only reprocesses assets and
//! rewrites storage when the version token actually changed. Network failure
//! with a warm cache is non-fatal; the only hard failure is "no schema
//! anywhere".

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assets::AssetCache;
use crate::error::SchemaError;
use crate::schema::{FieldIndex, FormSchema, VersionToken};
use crate::store::KeyValueStore;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote source of schema documents: JSON over HTTP GET, nothing more.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn fetch_schema(&self) -> Result<serde_json::Value>;
}

/// HTTP GET provider with an explicit timeout; a timeout is treated exactly
/// like any other fetch failure.
pub struct HttpSchemaProvider {
    client: Client,
    url: String,
}

impl HttpSchemaProvider {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(FETCH_TIMEOUT).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SchemaProvider for HttpSchemaProvider {
    async fn fetch_schema(&self) -> Result<serde_json::Value> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("HTTP {} fetching schema from {}", resp.status(), self.url);
        }
        Ok(resp.json().await?)
    }
}

/// Everything persisted for one schema version. Stored as a single JSON
/// value under one key, so the schema, field index and version token can
/// never be observed out of step with each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaBundle {
    pub schema: FormSchema,
    #[serde(rename = "fieldIndex")]
    pub field_index: FieldIndex,
    pub version: VersionToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Loading,
    Ready,
    Error,
}

pub struct SchemaSynchronizer {
    storage_key: String,
    provider: Arc<dyn SchemaProvider>,
    storage: Arc<dyn KeyValueStore>,
    assets: AssetCache,
    state: RwLock<SyncState>,
    bundle: RwLock<Option<Arc<SchemaBundle>>>,
    in_flight: Mutex<()>,
}

impl SchemaSynchronizer {
    pub fn new(
        storage_key: impl Into<String>,
        provider: Arc<dyn SchemaProvider>,
        storage: Arc<dyn KeyValueStore>,
        assets: AssetCache,
    ) -> Self {
        Self {
            storage_key: storage_key.into(),
            provider,
            storage,
            assets,
            state: RwLock::new(SyncState::Uninitialized),
            bundle: RwLock::new(None),
            in_flight: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.read().unwrap()
    }

    /// Current bundle, cached or freshly synced.
    pub fn bundle(&self) -> Option<Arc<SchemaBundle>> {
        self.bundle.read().unwrap().clone()
    }

    /// Run one sync pass. A request arriving while another pass is in
    /// flight is coalesced: it returns immediately and relies on the
    /// in-flight pass to complete, which prevents duplicate image downloads
    /// and double-writes to storage.
    pub async fn sync(&self) -> Result<(), SchemaError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("sync already in flight for '{}', coalescing", self.storage_key);
            return Ok(());
        };

        self.set_state(SyncState::Loading);

        // Offline-first: surface the cached bundle before the network round
        // trip resolves, so the flow can render immediately.
        if self.bundle().is_none() {
            match self.load_cached().await {
                Ok(Some(cached)) => {
                    info!(
                        "loaded cached schema '{}' version {}",
                        self.storage_key, cached.version
                    );
                    self.install(cached);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "failed to read cached schema '{}': {:#}",
                    self.storage_key, e
                ),
            }
        } else {
            // re-sync from Ready: keep serving the current bundle meanwhile
            self.set_state(SyncState::Ready);
        }

        let remote = match self.fetch_remote().await {
            Ok(schema) => schema,
            Err(e) => {
                // network failure is non-fatal when a cache exists
                if self.bundle().is_some() {
                    warn!(
                        "schema fetch failed for '{}', keeping cached version: {}",
                        self.storage_key, e
                    );
                    self.set_state(SyncState::Ready);
                    return Ok(());
                }
                self.set_state(SyncState::Error);
                return Err(e);
            }
        };

        let cached_version = self.bundle().map(|b| b.version.clone());
        if cached_version.as_ref() == Some(&remote.version) {
            // no-op fast path: zero image fetches, zero storage writes
            debug!(
                "schema '{}' unchanged at version {}, keeping cache",
                self.storage_key, remote.version
            );
            self.set_state(SyncState::Ready);
            return Ok(());
        }

        info!(
            "schema '{}' version changed ({} -> {}), materializing assets",
            self.storage_key,
            cached_version
                .as_ref()
                .map(VersionToken::as_str)
                .unwrap_or("none"),
            remote.version
        );

        let version = remote.version.clone();
        let materialized = self.assets.materialize(&remote).await;
        if !materialized.failures.is_empty() {
            warn!(
                "{} image(s) failed to materialize for '{}'; remote URLs kept",
                materialized.failures.len(),
                self.storage_key
            );
        }

        // Last-writer-by-version: if this exact version landed through
        // another path while assets were materializing, skip the rewrite.
        if self.bundle().map(|b| b.version == version).unwrap_or(false) {
            self.set_state(SyncState::Ready);
            return Ok(());
        }

        let bundle = SchemaBundle {
            schema: materialized.schema,
            field_index: materialized.field_index,
            version,
        };

        // Materialization completed (or failed soft per image) before this
        // point; a partially-materialized schema is never persisted as
        // "current". A storage failure only costs durability: the bundle
        // still serves from memory for this session.
        if let Err(e) = self.persist(&bundle).await {
            warn!(
                "failed to persist schema bundle '{}': {:#}",
                self.storage_key, e
            );
        }

        self.install(bundle);
        Ok(())
    }

    fn install(&self, bundle: SchemaBundle) {
        *self.bundle.write().unwrap() = Some(Arc::new(bundle));
        self.set_state(SyncState::Ready);
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write().unwrap() = state;
    }

    async fn fetch_remote(&self) -> Result<FormSchema, SchemaError> {
        let doc = self
            .provider
            .fetch_schema()
            .await
            .map_err(|e| SchemaError::Fetch(format!("{e:#}")))?;
        // a structurally invalid document is treated like a fetch failure
        FormSchema::from_value(doc)
    }

    async fn load_cached(&self) -> Result<Option<SchemaBundle>> {
        let Some(raw) = self.storage.get_item(&self.storage_key).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn persist(&self, bundle: &SchemaBundle) -> Result<()> {
        let raw = serde_json::to_string(bundle)?;
        self.storage.set_item(&self.storage_key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ImageFetcher, ImageStore};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        doc: RwLock<Result<serde_json::Value, String>>,
    }

    impl FakeProvider {
        fn ok(doc: serde_json::Value) -> Self {
            Self {
                doc: RwLock::new(Ok(doc)),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                doc: RwLock::new(Err(message.to_string())),
            }
        }

        fn set(&self, doc: serde_json::Value) {
            *self.doc.write().unwrap() = Ok(doc);
        }
    }

    #[async_trait]
    impl SchemaProvider for FakeProvider {
        async fn fetch_schema(&self) -> Result<serde_json::Value> {
            match &*self.doc.read().unwrap() {
                Ok(doc) => Ok(doc.clone()),
                Err(message) => Err(anyhow::anyhow!("{message}")),
            }
        }
    }

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let img = image::RgbaImage::new(1, 1);
            let mut bytes = Vec::new();
            img.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
                .unwrap();
            Ok(bytes)
        }
    }

    /// Storage wrapper that counts writes.
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get_item(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> Result<()> {
            self.inner.remove_item(key).await
        }
    }

    fn doc(version: &str) -> serde_json::Value {
        json!({
            "formId": "truck-cert",
            "version": version,
            "sections": [
                {"sectionId": "debris", "order": 1, "fields": [
                    {
                        "fieldId": "f1",
                        "name": "debris_type",
                        "type": "customSelector",
                        "options": [
                            {"label": "Oak", "value": "oak", "icon": {"url": "https://cdn.example/oak.png"}}
                        ]
                    }
                ]}
            ]
        })
    }

    fn synchronizer(
        provider: Arc<FakeProvider>,
        storage: Arc<CountingStore>,
        fetcher: Arc<CountingFetcher>,
        image_dir: &std::path::Path,
    ) -> SchemaSynchronizer {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        SchemaSynchronizer::new(
            "truck_schema_bundle",
            provider,
            storage,
            AssetCache::new(fetcher, ImageStore::new(image_dir).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_first_sync_fetches_materializes_persists() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::ok(doc("1.0")));
        let storage = Arc::new(CountingStore::new());
        let fetcher = Arc::new(CountingFetcher::new());
        let sync = synchronizer(provider, storage.clone(), fetcher.clone(), dir.path());

        assert_eq!(sync.state(), SyncState::Uninitialized);
        sync.sync().await.unwrap();

        assert_eq!(sync.state(), SyncState::Ready);
        let bundle = sync.bundle().unwrap();
        assert_eq!(bundle.version.as_str(), "1.0");
        assert!(bundle.field_index.contains_key("debris_type"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);

        // the persisted blob is one atomic unit
        let raw = storage.get_item("truck_schema_bundle").await.unwrap().unwrap();
        let persisted: SchemaBundle = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.version, bundle.version);
        assert_eq!(persisted.schema.form_id, "truck-cert");
    }

    #[tokio::test]
    async fn test_same_version_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::ok(doc("1.0")));
        let storage = Arc::new(CountingStore::new());
        let fetcher = Arc::new(CountingFetcher::new());
        let sync = synchronizer(provider, storage.clone(), fetcher.clone(), dir.path());

        sync.sync().await.unwrap();
        sync.sync().await.unwrap();

        // zero extra image requests, zero extra writes
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_version_change_replaces_bundle_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::ok(doc("1.0")));
        let storage = Arc::new(CountingStore::new());
        let fetcher = Arc::new(CountingFetcher::new());
        let sync = synchronizer(provider.clone(), storage.clone(), fetcher, dir.path());

        sync.sync().await.unwrap();
        provider.set(doc("2.0"));
        sync.sync().await.unwrap();

        assert_eq!(sync.bundle().unwrap().version.as_str(), "2.0");
        let raw = storage.get_item("truck_schema_bundle").await.unwrap().unwrap();
        let persisted: SchemaBundle = serde_json::from_str(&raw).unwrap();
        // never v2 token with v1 schema or vice versa
        assert_eq!(persisted.version.as_str(), "2.0");
        assert_eq!(persisted.schema.version.as_str(), "2.0");
    }

    #[tokio::test]
    async fn test_fetch_failure_with_cache_stays_ready() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::ok(doc("1.0")));
        let storage = Arc::new(CountingStore::new());
        let fetcher = Arc::new(CountingFetcher::new());

        // warm the cache, then build a fresh synchronizer over the same
        // storage whose provider always fails
        let sync = synchronizer(provider, storage.clone(), fetcher.clone(), dir.path());
        sync.sync().await.unwrap();

        let offline = synchronizer(
            Arc::new(FakeProvider::failing("connection refused")),
            storage,
            fetcher,
            dir.path(),
        );
        offline.sync().await.unwrap();
        assert_eq!(offline.state(), SyncState::Ready);
        assert_eq!(offline.bundle().unwrap().version.as_str(), "1.0");
    }

    #[tokio::test]
    async fn test_fetch_failure_without_cache_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(
            Arc::new(FakeProvider::failing("connection refused")),
            Arc::new(CountingStore::new()),
            Arc::new(CountingFetcher::new()),
            dir.path(),
        );

        let err = sync.sync().await.unwrap_err();
        assert!(matches!(err, SchemaError::Fetch(_)));
        assert_eq!(sync.state(), SyncState::Error);
        assert!(sync.bundle().is_none());
    }

    #[tokio::test]
    async fn test_invalid_document_treated_as_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(
            Arc::new(FakeProvider::ok(json!({"unexpected": true}))),
            Arc::new(CountingStore::new()),
            Arc::new(CountingFetcher::new()),
            dir.path(),
        );

        let err = sync.sync().await.unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
        assert_eq!(sync.state(), SyncState::Error);
    }

    #[tokio::test]
    async fn test_number_and_string_versions_compare_equal() {
        let dir = tempfile::tempdir().unwrap();
        let mut numeric = doc("x");
        numeric["version"] = json!(2);
        let provider = Arc::new(FakeProvider::ok(numeric));
        let storage = Arc::new(CountingStore::new());
        let fetcher = Arc::new(CountingFetcher::new());
        let sync = synchronizer(provider.clone(), storage.clone(), fetcher.clone(), dir.path());

        sync.sync().await.unwrap();
        assert_eq!(sync.bundle().unwrap().version.as_str(), "2");

        // the same version as a string must not trigger reprocessing
        provider.set(doc("2"));
        sync.sync().await.unwrap();
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_coalesces() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::ok(doc("1.0")));
        let storage = Arc::new(CountingStore::new());
        let fetcher = Arc::new(CountingFetcher::new());
        let sync = Arc::new(synchronizer(provider, storage.clone(), fetcher, dir.path()));

        let a = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.sync().await })
        };
        let b = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.sync().await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // at most one pass actually wrote
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
    }
}
