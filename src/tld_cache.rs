// On-disk layout and caching for TriMet live data.
//
// Everything lives under one data directory:
//   route_data.json                              cached normalized route list
//   stops/raw-data/<run-id>.json                 raw arrival response per run
//   stops/by-location/<stop-id>.csv              arrival rows per stop
//   stops/by-route-and-location/<route>/<stop-id>.csv

use crate::tld_models::{Result, Route, TLDError};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

// ============================================================================
// Data Directory Layout
// ============================================================================

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> DataDir {
        DataDir { root: root.into() }
    }

    /// Platform data directory, falling back to the working directory.
    pub fn default_location() -> DataDir {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("trimet_live_data");
        DataDir { root: path }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn route_cache_path(&self) -> PathBuf {
        self.root.join("route_data.json")
    }

    pub fn raw_data_dir(&self) -> PathBuf {
        self.root.join("stops").join("raw-data")
    }

    pub fn by_location_dir(&self) -> PathBuf {
        self.root.join("stops").join("by-location")
    }

    pub fn by_route_dir(&self) -> PathBuf {
        self.root.join("stops").join("by-route-and-location")
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.raw_data_dir(),
            self.by_location_dir(),
            self.by_route_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|e| TLDError::FileError(format!("Failed to create {:?}: {}", dir, e)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Cache Policy
// ============================================================================

/// Controls when an existing cache file is trusted instead of refetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CachePolicy {
    /// An existing cache file is ground truth for the lifetime of the
    /// data directory. This matches the historical behavior.
    Frozen,
    /// An existing cache file is reused until it is older than the given
    /// age, measured from its modification time.
    MaxAge(Duration),
    /// Always refetch, overwriting any existing cache file.
    Refresh,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Frozen
    }
}

impl CachePolicy {
    pub fn should_use(&self, path: &Path) -> bool {
        match self {
            CachePolicy::Frozen => path.is_file(),
            CachePolicy::Refresh => false,
            CachePolicy::MaxAge(max_age) => path.is_file() && !Self::is_expired(path, *max_age),
        }
    }

    fn is_expired(path: &Path, max_age: Duration) -> bool {
        match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age >= max_age)
                .unwrap_or(false),
            Err(_) => true,
        }
    }
}

// ============================================================================
// Route Cache (single file, all routes)
// ============================================================================

pub struct RouteCache {
    path: PathBuf,
}

impl RouteCache {
    pub fn new(data_dir: &DataDir) -> RouteCache {
        RouteCache {
            path: data_dir.route_cache_path(),
        }
    }

    pub fn load(&self, policy: CachePolicy) -> Option<Vec<Route>> {
        if !policy.should_use(&self.path) {
            if self.path.is_file() {
                println!("ℹ️  Route cache bypassed by policy, will fetch fresh data");
            } else {
                println!("ℹ️  No route cache found, will fetch fresh data");
            }
            return None;
        }

        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Vec<Route>>(&contents) {
                Ok(routes) => {
                    println!("✓ Route cache loaded ({} routes)", routes.len());
                    Some(routes)
                }
                Err(e) => {
                    println!("⚠️  Failed to parse route cache ({}), will refetch", e);
                    None
                }
            },
            Err(e) => {
                println!("⚠️  Failed to read route cache ({}), will refetch", e);
                None
            }
        }
    }

    pub fn save(&self, routes: &[Route]) -> Result<()> {
        let json = serde_json::to_string_pretty(routes)
            .map_err(|e| TLDError::FileError(format!("Failed to serialize route cache: {}", e)))?;

        fs::write(&self.path, json)
            .map_err(|e| TLDError::FileError(format!("Failed to write route cache: {}", e)))?;

        println!("✓ Route cache saved to: {:?}", self.path);
        Ok(())
    }
}

// ============================================================================
// Raw Arrival Cache (one file per run)
// ============================================================================

/// Raw response bodies keyed by run identifier. A hit replays a previous
/// run verbatim; since run ids are normally fresh UUIDs, hits only occur
/// when the caller deliberately supplies a fixed run id.
pub struct RawRunCache {
    dir: PathBuf,
}

impl RawRunCache {
    pub fn new(data_dir: &DataDir) -> RawRunCache {
        RawRunCache {
            dir: data_dir.raw_data_dir(),
        }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    pub fn load(&self, run_id: &str) -> Option<String> {
        let path = self.path_for(run_id);
        if !path.is_file() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(body) => {
                debug!("raw cache hit for run {}", run_id);
                Some(body)
            }
            Err(e) => {
                println!("⚠️  Failed to read cached run {} ({}), will refetch", run_id, e);
                None
            }
        }
    }

    pub fn save(&self, run_id: &str, body: &str) -> Result<()> {
        let path = self.path_for(run_id);
        fs::write(&path, body)
            .map_err(|e| TLDError::FileError(format!("Failed to write {:?}: {}", path, e)))?;
        debug!("raw response cached at {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_routes() -> Vec<Route> {
        vec![Route {
            id: 9,
            route: 9,
            desc: "9-Powell Blvd".to_string(),
            route_type: Some("B".to_string()),
            route_color: None,
            frequent_service: Some(true),
            stop_ids: BTreeSet::from([100, 200, 300]),
        }]
    }

    #[test]
    fn test_ensure_layout_creates_all_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(tmp.path());
        data_dir.ensure_layout().unwrap();

        assert!(data_dir.raw_data_dir().is_dir());
        assert!(data_dir.by_location_dir().is_dir());
        assert!(data_dir.by_route_dir().is_dir());
    }

    #[test]
    fn test_frozen_policy_trusts_existing_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(tmp.path());
        data_dir.ensure_layout().unwrap();

        let cache = RouteCache::new(&data_dir);
        assert!(cache.load(CachePolicy::Frozen).is_none());

        cache.save(&sample_routes()).unwrap();
        let loaded = cache.load(CachePolicy::Frozen).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].stop_ids, BTreeSet::from([100, 200, 300]));
    }

    #[test]
    fn test_refresh_policy_bypasses_existing_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(tmp.path());
        data_dir.ensure_layout().unwrap();

        let cache = RouteCache::new(&data_dir);
        cache.save(&sample_routes()).unwrap();
        assert!(cache.load(CachePolicy::Refresh).is_none());
    }

    #[test]
    fn test_max_age_policy_expires_old_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(tmp.path());
        data_dir.ensure_layout().unwrap();

        let cache = RouteCache::new(&data_dir);
        cache.save(&sample_routes()).unwrap();

        assert!(cache.load(CachePolicy::MaxAge(Duration::ZERO)).is_none());
        assert!(
            cache
                .load(CachePolicy::MaxAge(Duration::from_secs(3600)))
                .is_some()
        );
    }

    #[test]
    fn test_corrupt_route_cache_is_treated_as_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(tmp.path());
        data_dir.ensure_layout().unwrap();

        fs::write(data_dir.route_cache_path(), "not json").unwrap();
        let cache = RouteCache::new(&data_dir);
        assert!(cache.load(CachePolicy::Frozen).is_none());
    }

    #[test]
    fn test_raw_run_cache_replays_saved_body() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(tmp.path());
        data_dir.ensure_layout().unwrap();

        let raw = RawRunCache::new(&data_dir);
        assert!(raw.load("fixed-run").is_none());

        raw.save("fixed-run", r#"{"resultSet":{"arrival":[]}}"#).unwrap();
        let body = raw.load("fixed-run").unwrap();
        assert!(body.contains("resultSet"));
        assert!(raw.path_for("fixed-run").is_file());
    }
}
