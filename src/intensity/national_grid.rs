//! Great Britain regional forecasts from the National Grid ESO
//! Carbon Intensity API (<https://carbonintensity.org.uk>).

use super::{CarbonIntensityProvider, IntensitySnapshot, UNKNOWN_INTENSITY};
use crate::error::{Error, Result};
use crate::intensity::registry::RegionInfo;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use log::debug;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.carbonintensity.org.uk";

/// Timestamp format used in request paths and replies, always UTC.
const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%MZ";

/// The API publishes half-hour windows; three cover now, next and later.
const FORECAST_SPAN_MINUTES: i64 = 90;

pub const REGIONS: &[RegionInfo] = &[
    RegionInfo { id: "1", name: "North Scotland" },
    RegionInfo { id: "2", name: "South Scotland" },
    RegionInfo { id: "3", name: "North West England" },
    RegionInfo { id: "4", name: "North East England" },
    RegionInfo { id: "5", name: "Yorkshire" },
    RegionInfo { id: "6", name: "North Wales & Merseyside" },
    RegionInfo { id: "7", name: "South Wales" },
    RegionInfo { id: "8", name: "West Midlands" },
    RegionInfo { id: "9", name: "East Midlands" },
    RegionInfo { id: "10", name: "East England" },
    RegionInfo { id: "11", name: "South West England" },
    RegionInfo { id: "12", name: "South England" },
    RegionInfo { id: "13", name: "London" },
    RegionInfo { id: "14", name: "South East England" },
    RegionInfo { id: "15", name: "England" },
    RegionInfo { id: "16", name: "Scotland" },
    RegionInfo { id: "17", name: "Wales" },
];

pub struct NationalGrid {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl NationalGrid {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("leafprint/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn request_url(&self, region_id: u32, from: DateTime<Utc>) -> String {
        let to = from + TimeDelta::minutes(FORECAST_SPAN_MINUTES);
        format!(
            "{}/regional/intensity/{}/{}/regionid/{}",
            self.base_url,
            from.format(API_TIME_FORMAT),
            to.format(API_TIME_FORMAT),
            region_id
        )
    }
}

impl CarbonIntensityProvider for NationalGrid {
    fn name(&self) -> &str {
        "national-grid"
    }

    fn fetch(&self, region_id: &str) -> IntensitySnapshot {
        let Some(region) = parse_region(region_id) else {
            return IntensitySnapshot::error(format!(
                "Region '{}' is not a National Grid region (expected 1-{}).",
                region_id,
                REGIONS.len()
            ));
        };

        let now = Utc::now();
        let url = self.request_url(region, now);
        debug!("GET {}", url);

        let response = match self.client.get(&url).send() {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return IntensitySnapshot::error("API didn't reply in time.");
            }
            Err(e) => {
                return IntensitySnapshot::error(format!(
                    "Network request could not be processed: {}",
                    e
                ));
            }
        };

        let status = response.status();
        let body = match response.text() {
            Ok(b) => b,
            Err(e) => {
                return IntensitySnapshot::error(format!("Failed to read reply body: {}", e));
            }
        };

        let snapshot = parse_response(&body, now);
        if snapshot.valid && !status.is_success() {
            return IntensitySnapshot::error(format!("API replied with HTTP {}.", status));
        }
        snapshot
    }
}

fn parse_region(region_id: &str) -> Option<u32> {
    let id: u32 = region_id.trim().parse().ok()?;
    (1..=REGIONS.len() as u32).contains(&id).then_some(id)
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<RegionPayload>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegionPayload {
    Many(Vec<RegionData>),
    One(RegionData),
}

#[derive(Deserialize)]
struct RegionData {
    #[serde(default)]
    data: Vec<Window>,
}

#[derive(Deserialize)]
struct Window {
    from: Option<String>,
    to: Option<String>,
    intensity: Option<Intensity>,
}

#[derive(Deserialize)]
struct Intensity {
    forecast: Option<i32>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<serde_json::Value>,
    message: Option<serde_json::Value>,
}

fn value_text(value: Option<&serde_json::Value>, fallback: &str) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => fallback.to_string(),
    }
}

fn parse_time(value: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(|s| NaiveDateTime::parse_from_str(s, API_TIME_FORMAT).ok())
        .map(|n| n.and_utc())
        .unwrap_or(fallback)
}

/// Turn an API reply body into a snapshot. `now` fills in missing window
/// bounds.
pub fn parse_response(body: &str, now: DateTime<Utc>) -> IntensitySnapshot {
    if body.trim().is_empty() {
        return IntensitySnapshot::error("Empty reply received.");
    }

    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(e) => e,
        Err(e) => {
            return IntensitySnapshot::error(format!(
                "The reply is not a valid API response: {}",
                e
            ));
        }
    };

    if let Some(err) = envelope.error {
        return IntensitySnapshot::error(format!(
            "The API returned an error: {}({}).",
            value_text(err.message.as_ref(), "none"),
            value_text(err.code.as_ref(), "unknown")
        ));
    }

    let windows: Vec<Window> = match envelope.data {
        Some(RegionPayload::Many(regions)) => regions.into_iter().flat_map(|r| r.data).collect(),
        Some(RegionPayload::One(region)) => region.data,
        None => Vec::new(),
    };

    let Some(first) = windows.first() else {
        return IntensitySnapshot::error("Response contained no forecast windows.");
    };

    let forecast = |i: usize| {
        windows
            .get(i)
            .and_then(|w| w.intensity.as_ref())
            .and_then(|v| v.forecast)
            .unwrap_or(UNKNOWN_INTENSITY)
    };

    let valid_from = parse_time(first.from.as_deref(), now);
    let valid_to = parse_time(first.to.as_deref(), now);

    IntensitySnapshot::ok(forecast(0), forecast(1), forecast(2), valid_from, valid_to)
}
