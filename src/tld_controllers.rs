// Controllers for TriMet live data collection: credential loading, webservice
// access, and the fetch-cache-reshape-partition pipeline.

use crate::tld_cache::{CachePolicy, DataDir, RawRunCache, RouteCache};
use crate::tld_models::{
    Arrival, ArrivalsResponse, Result, Route, RouteConfigResponse, TLDError, normalize_routes,
    reshape_arrivals,
};
use crate::tld_partitions::PartitionWriter;
use log::{debug, info};
use reqwest::blocking;
use std::path::Path;
use uuid::Uuid;

/// Hard cap on a single arrivals request. Larger batches are rejected,
/// not chunked.
pub const MAX_STOPS_PER_REQUEST: usize = 10;

// ============================================================================
// Credential Loading
// ============================================================================

#[derive(Debug)]
pub struct Credentials {
    pub app_id: String,
}

impl Credentials {
    const APP_ID_KEY: &'static str = "TRIMET_APP_ID";

    /// Read the application identifier from a dotenv file. The file and the
    /// key are both required; the process environment is not touched.
    pub fn load(path: &Path) -> Result<Credentials> {
        let entries = dotenvy::from_path_iter(path).map_err(|e| {
            TLDError::ConfigMissing(format!(
                "Failed to read {:?}: {}. Please save a .env file with {} to continue.",
                path,
                e,
                Self::APP_ID_KEY
            ))
        })?;

        for entry in entries {
            let (key, value) = entry.map_err(|e| {
                TLDError::ConfigMissing(format!("Malformed entry in {:?}: {}", path, e))
            })?;
            if key == Self::APP_ID_KEY {
                return Ok(Credentials { app_id: value });
            }
        }

        Err(TLDError::ConfigMissing(format!(
            "{} not set in {:?}",
            Self::APP_ID_KEY,
            path
        )))
    }
}

// ============================================================================
// Webservice Client
// ============================================================================

#[derive(Debug)]
pub struct TriMetClient {
    client: blocking::Client,
    app_id: String,
}

impl TriMetClient {
    const BASE_URL_ROUTES: &'static str = "https://developer.trimet.org/ws/V1/routeConfig";
    const BASE_URL_ARRIVALS: &'static str = "https://developer.trimet.org/ws/v2/arrivals";
    const REQUEST_TIMEOUT_SECS: u64 = 15;

    pub fn new(credentials: Credentials) -> Result<TriMetClient> {
        let client = blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TLDError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(TriMetClient {
            client,
            app_id: credentials.app_id,
        })
    }

    /// Full route listing with directions and stops.
    pub fn fetch_route_config(&self) -> Result<RouteConfigResponse> {
        let url = format!(
            "{}/appID/{}/json/true/dir/true/stops/true/",
            Self::BASE_URL_ROUTES,
            self.app_id
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().map_err(|e| {
            TLDError::NetworkError(format!(
                "Failed to fetch routes: {}. Check your internet connection.",
                e
            ))
        })?;

        if !response.status().is_success() {
            return Err(TLDError::NetworkError(format!(
                "API returned error: {}",
                response.status()
            )));
        }

        response
            .json::<RouteConfigResponse>()
            .map_err(|e| TLDError::ParseError(format!("Invalid route config response: {}", e)))
    }

    /// Arrival predictions for the given stops. Returns the raw body so it
    /// can be cached verbatim before parsing.
    pub fn fetch_arrivals_raw(&self, stop_ids: &[i64]) -> Result<String> {
        let loc_ids = stop_ids
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/appID/{}/locIDs/{}/",
            Self::BASE_URL_ARRIVALS,
            self.app_id,
            loc_ids
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().map_err(|e| {
            TLDError::NetworkError(format!(
                "Failed to fetch arrivals: {}. Check your internet connection.",
                e
            ))
        })?;

        if !response.status().is_success() {
            return Err(TLDError::NetworkError(format!(
                "API returned error: {}",
                response.status()
            )));
        }

        response
            .text()
            .map_err(|e| TLDError::NetworkError(format!("Failed to read arrivals response: {}", e)))
    }
}

// ============================================================================
// Main Implementation
// ============================================================================

/// Live data collector bound to a single route. Construction populates or
/// loads the route cache and resolves the configured route; arrival fetches
/// validate against that route's stop set before touching the network.
#[derive(Debug)]
pub struct TriMetData {
    route_id: i64,
    route: Route,
    client: TriMetClient,
    data_dir: DataDir,
}

impl TriMetData {
    /// Construct against the default data directory, reading credentials
    /// from ./.env. An existing route cache is treated as frozen.
    pub fn new(route_id: i64) -> Result<TriMetData> {
        let credentials = Credentials::load(Path::new(".env"))?;
        Self::with_config(
            route_id,
            credentials,
            DataDir::default_location(),
            CachePolicy::Frozen,
        )
    }

    pub fn with_config(
        route_id: i64,
        credentials: Credentials,
        data_dir: DataDir,
        policy: CachePolicy,
    ) -> Result<TriMetData> {
        data_dir.ensure_layout()?;
        let client = TriMetClient::new(credentials)?;

        let route_cache = RouteCache::new(&data_dir);
        let routes = match route_cache.load(policy) {
            Some(routes) => routes,
            None => {
                println!("Fetching data");
                let response = client.fetch_route_config()?;
                let routes = normalize_routes(response.result_set.route);
                route_cache.save(&routes)?;
                routes
            }
        };

        let route = routes
            .into_iter()
            .find(|r| r.id == route_id)
            .ok_or_else(|| TLDError::NotFound(format!("No route with id {}", route_id)))?;

        info!(
            "configured route {}: {} ({} stops)",
            route.id,
            route.desc,
            route.stop_ids.len()
        );

        Ok(TriMetData {
            route_id,
            route,
            client,
            data_dir,
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Fetch arrivals for the given stops in one request, cache the raw
    /// response under the run id, then reshape and append the rows into both
    /// partition schemes. Returns the reshaped rows.
    ///
    /// A pre-existing raw cache file for the run id short-circuits the
    /// network request and replays that response instead.
    pub fn fetch_arrival_data_by_stop(
        &self,
        stop_ids: &[i64],
        run_id: Option<&str>,
    ) -> Result<Vec<Arrival>> {
        if stop_ids.is_empty() {
            return Err(TLDError::InvalidArgument(
                "At least one stop id is required".to_string(),
            ));
        }
        if stop_ids.len() > MAX_STOPS_PER_REQUEST {
            return Err(TLDError::InvalidArgument(format!(
                "Too many stop ids passed ({}, maximum is {})",
                stop_ids.len(),
                MAX_STOPS_PER_REQUEST
            )));
        }
        let unknown: Vec<i64> = stop_ids
            .iter()
            .copied()
            .filter(|s| !self.route.serves_stop(*s))
            .collect();
        if !unknown.is_empty() {
            return Err(TLDError::InvalidArgument(format!(
                "Stop ids {:?} not served by route {}",
                unknown, self.route_id
            )));
        }

        let unique_run_id = match run_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let raw_cache = RawRunCache::new(&self.data_dir);
        let body = match raw_cache.load(&unique_run_id) {
            Some(body) => {
                println!("Reading data");
                body
            }
            None => {
                println!("Fetching data");
                let body = self.client.fetch_arrivals_raw(stop_ids)?;
                raw_cache.save(&unique_run_id, &body)?;
                body
            }
        };

        let response: ArrivalsResponse = serde_json::from_str(&body)
            .map_err(|e| TLDError::ParseError(format!("Invalid arrivals response: {}", e)))?;

        let rows = reshape_arrivals(&response, &unique_run_id);
        info!(
            "run {}: {} arrivals across {} requested stops",
            unique_run_id,
            rows.len(),
            stop_ids.len()
        );

        PartitionWriter::new(&self.data_dir).write_batch(&rows)?;
        Ok(rows)
    }
}
