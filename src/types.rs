use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Requester identity on the messaging channel (a chat id).
pub type ChatId = i64;

/// One request to scan a single address on behalf of a requester.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: String,
    pub requester: ChatId,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>, requester: ChatId) -> Self {
        Self {
            target: target.into(),
            requester,
            submitted_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A `<port>/tcp open <service>` line from the scanner's port table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenPortRecord {
    pub port: String,
    pub service: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Open,
    Closed,
}

impl ServiceState {
    pub fn label(self) -> &'static str {
        match self {
            ServiceState::Open => "Open",
            ServiceState::Closed => "Closed",
        }
    }
}

/// Open/closed verdict for one watch-listed port.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CriticalServiceStatus {
    pub port: u16,
    pub label: &'static str,
    pub state: ServiceState,
}

/// A scanner output line flagged as vulnerability related.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VulnerabilityFinding {
    pub description: String,
    pub cve: Option<String>,
    pub link: Option<String>,
}

/// Geolocation context for the scanned address. Empty strings mean unknown.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub address: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoInfo {
    pub fn unknown(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Map link for the coordinates, if both are known.
    pub fn map_link(&self) -> Option<String> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(format!("https://www.google.com/maps?q={lat},{lon}")),
            _ => None,
        }
    }
}

/// The structured views extracted from one raw scan output.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanFindings {
    pub open_ports: Vec<OpenPortRecord>,
    pub critical_services: Vec<CriticalServiceStatus>,
    pub vulnerabilities: Vec<VulnerabilityFinding>,
    pub ports_examined: u64,
}

/// The terminal artifact of one scan request.
#[derive(Serialize, Debug, Clone)]
pub struct ScanReport {
    pub geo: GeoInfo,
    pub duration: Duration,
    pub findings: ScanFindings,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl ScanReport {
    pub fn duration_secs(&self) -> String {
        format!("{:.2}", self.duration.as_secs_f64())
    }
}
