//! The three form domains the app ships and their fixed wiring: storage
//! key, remote schema path, and image cache directory. Each domain gets its
//! own synchronizer so a truck-cert sync never touches monitor state.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::assets::{AssetCache, HttpImageFetcher, ImageStore};
use crate::store::KeyValueStore;
use crate::sync::{HttpSchemaProvider, SchemaSynchronizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    TruckCertification,
    FieldMonitor,
    SiteMonitor,
}

impl Domain {
    pub const ALL: [Domain; 3] = [
        Domain::TruckCertification,
        Domain::FieldMonitor,
        Domain::SiteMonitor,
    ];

    /// Key the persisted schema bundle lives under.
    pub fn storage_key(self) -> &'static str {
        match self {
            Domain::TruckCertification => "truck_schema_bundle",
            Domain::FieldMonitor => "field_monitor_schema_bundle",
            Domain::SiteMonitor => "site_monitor_schema_bundle",
        }
    }

    /// Path of the schema document on the API host.
    pub fn schema_path(self) -> &'static str {
        match self {
            Domain::TruckCertification => "/schema/truck-cert",
            Domain::FieldMonitor => "/schema/field-monitor",
            Domain::SiteMonitor => "/schema/site-monitor",
        }
    }

    /// Image cache directory name, relative to the cache root.
    pub fn image_dir(self) -> &'static str {
        match self {
            Domain::TruckCertification => "truck-schema-images",
            Domain::FieldMonitor => "field-monitor-schema-images",
            Domain::SiteMonitor => "site-monitor-schema-images",
        }
    }

    /// Build the domain's synchronizer over HTTP: schema fetched from
    /// `base_url` + the domain path, images cached under the domain's
    /// directory in `cache_root`.
    pub fn synchronizer(
        self,
        base_url: &str,
        storage: Arc<dyn KeyValueStore>,
        cache_root: &Path,
    ) -> Result<SchemaSynchronizer> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.schema_path());
        let provider = Arc::new(HttpSchemaProvider::new(url)?);
        let assets = AssetCache::new(
            Arc::new(HttpImageFetcher::new()?),
            ImageStore::new(cache_root.join(self.image_dir()))?,
        );
        Ok(SchemaSynchronizer::new(
            self.storage_key(),
            provider,
            storage,
            assets,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_domain_wiring_is_disjoint() {
        let keys: Vec<_> = Domain::ALL.iter().map(|d| d.storage_key()).collect();
        let paths: Vec<_> = Domain::ALL.iter().map(|d| d.schema_path()).collect();
        let dirs: Vec<_> = Domain::ALL.iter().map(|d| d.image_dir()).collect();
        for set in [&keys, &paths, &dirs] {
            let mut unique = set.to_vec();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), Domain::ALL.len());
        }
    }

    #[test]
    fn test_synchronizer_construction() {
        let dir = tempfile::tempdir().unwrap();
        let sync = Domain::TruckCertification
            .synchronizer("https://api.example.com/", Arc::new(MemoryStore::new()), dir.path())
            .unwrap();
        assert_eq!(sync.state(), crate::sync::SyncState::Uninitialized);
        assert!(dir.path().join("truck-schema-images").is_dir());
    }
}
