// API models and data shaping for TriMet (Portland, OR) public transit service
// Official website: https://trimet.org/
//
// API Endpoints:
// - Route Configuration V1: https://developer.trimet.org/ws/V1/routeConfig
// - Arrivals V2: https://developer.trimet.org/ws/v2/arrivals

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::US::Pacific;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum TLDError {
    ConfigMissing(String),
    NotFound(String),
    InvalidArgument(String),
    NetworkError(String),
    ParseError(String),
    FileError(String),
}

impl std::fmt::Display for TLDError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TLDError::ConfigMissing(e) => write!(f, "Configuration missing: {}", e),
            TLDError::NotFound(e) => write!(f, "Not found: {}", e),
            TLDError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            TLDError::NetworkError(e) => write!(f, "Network error: {}", e),
            TLDError::ParseError(e) => write!(f, "Parse error: {}", e),
            TLDError::FileError(e) => write!(f, "File error: {}", e),
        }
    }
}

impl std::error::Error for TLDError {}

pub type Result<T> = std::result::Result<T, TLDError>;

// ============================================================================
// Route Configuration Response (V1 routeConfig)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfigResponse {
    #[serde(rename = "resultSet")]
    pub result_set: RouteResultSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteResultSet {
    #[serde(default)]
    pub route: Vec<RawRoute>,
}

/// One route as returned by the webservice, directions still nested.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRoute {
    pub id: i64,
    pub route: i64,
    pub desc: String,
    #[serde(rename = "type")]
    pub route_type: Option<String>,
    #[serde(rename = "routeColor")]
    pub route_color: Option<String>,
    #[serde(rename = "frequentService")]
    pub frequent_service: Option<bool>,
    #[serde(default)]
    pub dir: Vec<RawDirection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDirection {
    pub dir: Option<i64>,
    pub desc: Option<String>,
    // some directions come back without a stop list at all
    #[serde(default)]
    pub stop: Vec<RawStop>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStop {
    pub locid: i64,
    pub desc: Option<String>,
}

// ============================================================================
// Normalized Route
// ============================================================================

/// Flat per-route record. The nested per-direction stop lists are collapsed
/// into `stopIds`, a deduplicated set of stop identifiers across all
/// directions. This is the shape persisted in route_data.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub route: i64,
    pub desc: String,
    #[serde(rename = "type")]
    pub route_type: Option<String>,
    #[serde(rename = "routeColor")]
    pub route_color: Option<String>,
    #[serde(rename = "frequentService")]
    pub frequent_service: Option<bool>,
    #[serde(rename = "stopIds")]
    pub stop_ids: BTreeSet<i64>,
}

impl Route {
    pub fn from_raw(raw: RawRoute) -> Route {
        let mut stop_ids = BTreeSet::new();
        for dir in &raw.dir {
            for stop in &dir.stop {
                stop_ids.insert(stop.locid);
            }
        }

        Route {
            id: raw.id,
            route: raw.route,
            desc: raw.desc,
            route_type: raw.route_type,
            route_color: raw.route_color,
            frequent_service: raw.frequent_service,
            stop_ids,
        }
    }

    pub fn serves_stop(&self, locid: i64) -> bool {
        self.stop_ids.contains(&locid)
    }
}

/// Collapse the raw route listing into flat records, one per route.
pub fn normalize_routes(raw: Vec<RawRoute>) -> Vec<Route> {
    raw.into_iter().map(Route::from_raw).collect()
}

// ============================================================================
// Arrivals Response (V2 arrivals)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ArrivalsResponse {
    #[serde(rename = "resultSet")]
    pub result_set: ArrivalResultSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArrivalResultSet {
    #[serde(rename = "queryTime")]
    pub query_time: Option<i64>,
    #[serde(default)]
    pub arrival: Vec<RawArrival>,
}

/// One arrival event as returned by the webservice. `estimated` is absent
/// when no prediction exists yet; `scheduled` is always present.
/// Both are epoch milliseconds UTC.
#[derive(Debug, Clone, Deserialize)]
pub struct RawArrival {
    #[serde(rename = "vehicleID")]
    pub vehicle_id: Option<String>,
    #[serde(rename = "tripID")]
    pub trip_id: Option<String>,
    pub locid: i64,
    pub route: i64,
    pub estimated: Option<i64>,
    pub scheduled: i64,
    pub departed: bool,
    pub status: String,
}

// ============================================================================
// Arrival Record (tabular output shape)
// ============================================================================

/// One reshaped arrival row. Field order is the CSV column order:
/// lexicographic by column name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrival {
    pub departed: bool,
    pub estimated: Option<String>,
    pub locid: i64,
    pub route: i64,
    pub scheduled: String,
    pub status: String,
    #[serde(rename = "tripID")]
    pub trip_id: String,
    pub unique_run_id: String,
    #[serde(rename = "vehicleID")]
    pub vehicle_id: String,
}

pub const ARRIVAL_COLUMNS: [&str; 9] = [
    "departed",
    "estimated",
    "locid",
    "route",
    "scheduled",
    "status",
    "tripID",
    "unique_run_id",
    "vehicleID",
];

/// Convert a parsed arrivals response into tabular records: timestamps to
/// US/Pacific civil time, every row tagged with the run identifier. Pure
/// transformation, no fetching or caching here.
pub fn reshape_arrivals(response: &ArrivalsResponse, run_id: &str) -> Vec<Arrival> {
    response
        .result_set
        .arrival
        .iter()
        .map(|raw| Arrival {
            departed: raw.departed,
            estimated: raw.estimated.map(format_timestamp_ms),
            locid: raw.locid,
            route: raw.route,
            scheduled: format_timestamp_ms(raw.scheduled),
            status: raw.status.clone(),
            trip_id: raw.trip_id.clone().unwrap_or_default(),
            unique_run_id: run_id.to_string(),
            vehicle_id: raw.vehicle_id.clone().unwrap_or_default(),
        })
        .collect()
}

// ============================================================================
// Time Helpers
// ============================================================================

pub fn format_timestamp_ms(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => {
            let pacific_time = dt.with_timezone(&Pacific);
            pacific_time.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        None => format!("Invalid timestamp: {}", epoch_ms),
    }
}

/// Seconds of delay between a row's estimated and scheduled times, or None
/// when no estimate exists.
pub fn arrival_delay_seconds(row: &Arrival) -> Option<i64> {
    let estimated =
        NaiveDateTime::parse_from_str(row.estimated.as_deref()?, "%Y-%m-%d %H:%M:%S").ok()?;
    let scheduled = NaiveDateTime::parse_from_str(&row.scheduled, "%Y-%m-%d %H:%M:%S").ok()?;
    Some((estimated - scheduled).num_seconds())
}

/// Format delay as a readable string
pub fn format_delay(delay_seconds: i64) -> String {
    let minutes = delay_seconds / 60;
    let seconds = delay_seconds.abs() % 60;

    if delay_seconds >= -30 && delay_seconds <= 30 {
        "On time".to_string()
    } else if minutes == 0 {
        format!("{:+}s", delay_seconds)
    } else if seconds == 0 {
        format!("{:+} min", minutes)
    } else {
        format!("{:+} min {}s", minutes, seconds)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_route_config() -> RouteConfigResponse {
        // stop 200 repeats across both directions, direction 2 has no stops
        let body = r#"{
            "resultSet": {
                "route": [
                    {
                        "id": 9,
                        "route": 9,
                        "desc": "9-Powell Blvd",
                        "type": "B",
                        "routeColor": "008852",
                        "frequentService": true,
                        "dir": [
                            {
                                "dir": 0,
                                "desc": "To Portland",
                                "stop": [
                                    {"locid": 100, "desc": "A"},
                                    {"locid": 200, "desc": "B"}
                                ]
                            },
                            {
                                "dir": 1,
                                "desc": "To Gresham",
                                "stop": [
                                    {"locid": 200, "desc": "B"},
                                    {"locid": 300, "desc": "C"}
                                ]
                            },
                            {
                                "dir": 2,
                                "desc": "Short turn"
                            }
                        ]
                    }
                ]
            }
        }"#;
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_normalize_dedups_stop_ids_across_directions() {
        let response = sample_route_config();
        let routes = normalize_routes(response.result_set.route);
        assert_eq!(routes.len(), 1);

        let route = &routes[0];
        assert_eq!(route.id, 9);
        assert_eq!(route.stop_ids.len(), 3);
        assert!(route.serves_stop(100));
        assert!(route.serves_stop(200));
        assert!(route.serves_stop(300));
        assert!(!route.serves_stop(400));
    }

    #[test]
    fn test_direction_without_stop_list_contributes_nothing() {
        let body = r#"{
            "resultSet": {
                "route": [
                    {
                        "id": 17,
                        "route": 17,
                        "desc": "17-Holgate",
                        "dir": [{"dir": 0, "desc": "To Downtown"}]
                    }
                ]
            }
        }"#;
        let response: RouteConfigResponse = serde_json::from_str(body).unwrap();
        let routes = normalize_routes(response.result_set.route);
        assert!(routes[0].stop_ids.is_empty());
    }

    #[test]
    fn test_normalized_route_serializes_stop_ids_as_list() {
        let response = sample_route_config();
        let routes = normalize_routes(response.result_set.route);
        let json = serde_json::to_value(&routes[0]).unwrap();
        assert!(json["stopIds"].is_array());
        assert_eq!(json["stopIds"].as_array().unwrap().len(), 3);
        assert_eq!(json["routeColor"], "008852");
    }

    #[test]
    fn test_epoch_zero_converts_to_pacific_standard_time() {
        assert_eq!(format_timestamp_ms(0), "1969-12-31 16:00:00");
    }

    #[test]
    fn test_arrival_columns_are_sorted() {
        assert!(ARRIVAL_COLUMNS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reshape_tags_run_id_and_handles_missing_estimate() {
        let body = r#"{
            "resultSet": {
                "queryTime": 1714000000000,
                "arrival": [
                    {
                        "vehicleID": "4021",
                        "tripID": "1234567",
                        "locid": 13791,
                        "route": 9,
                        "estimated": 60000,
                        "scheduled": 0,
                        "departed": false,
                        "status": "estimated"
                    },
                    {
                        "locid": 4539,
                        "route": 9,
                        "scheduled": 0,
                        "departed": true,
                        "status": "scheduled"
                    }
                ]
            }
        }"#;
        let response: ArrivalsResponse = serde_json::from_str(body).unwrap();
        let rows = reshape_arrivals(&response, "run-abc");

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.unique_run_id == "run-abc"));
        assert_eq!(rows[0].estimated.as_deref(), Some("1969-12-31 16:01:00"));
        assert_eq!(rows[0].scheduled, "1969-12-31 16:00:00");
        assert_eq!(rows[1].estimated, None);
        assert_eq!(rows[1].vehicle_id, "");
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(0), "On time");
        assert_eq!(format_delay(-25), "On time");
        assert_eq!(format_delay(45), "+45s");
        assert_eq!(format_delay(120), "+2 min");
        assert_eq!(format_delay(-150), "-2 min 30s");
    }

    #[test]
    fn test_arrival_delay_from_civil_timestamps() {
        let row = Arrival {
            departed: false,
            estimated: Some("1969-12-31 16:01:00".to_string()),
            locid: 13791,
            route: 9,
            scheduled: "1969-12-31 16:00:00".to_string(),
            status: "estimated".to_string(),
            trip_id: "1234567".to_string(),
            unique_run_id: "run-abc".to_string(),
            vehicle_id: "4021".to_string(),
        };
        assert_eq!(arrival_delay_seconds(&row), Some(60));

        let mut no_estimate = row.clone();
        no_estimate.estimated = None;
        assert_eq!(arrival_delay_seconds(&no_estimate), None);
    }
}
