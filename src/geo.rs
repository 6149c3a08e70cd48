use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::types::GeoInfo;

/// Resolves an address to coarse location and network-owner details.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<GeoInfo>;
}

/// Client for the ip-api.com JSON endpoint.
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    http: reqwest::Client,
    endpoint: String,
}

/// ip-api.com response body. Every field is optional on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    country: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl IpApiLocator {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build geolocation HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

fn into_geo_info(address: &str, body: IpApiResponse) -> Result<GeoInfo> {
    if body.status.as_deref() == Some("fail") {
        bail!(
            "geolocation lookup failed for {address}: {}",
            body.message.unwrap_or_else(|| "no reason given".into())
        );
    }
    Ok(GeoInfo {
        address: address.to_string(),
        country: body.country.unwrap_or_default(),
        region: body.region_name.unwrap_or_default(),
        city: body.city.unwrap_or_default(),
        isp: body.isp.unwrap_or_default(),
        latitude: body.lat,
        longitude: body.lon,
    })
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn lookup(&self, address: &str) -> Result<GeoInfo> {
        let url = format!("{}/{}", self.endpoint, address);
        let body: IpApiResponse = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("geolocation request failed: {url}"))?
            .error_for_status()?
            .json()
            .await
            .context("invalid geolocation response")?;
        into_geo_info(address, body)
    }
}
