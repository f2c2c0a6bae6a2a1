use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use clearview_core::config::GeoConfig;
use clearview_core::session::PropertyEstimate;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("{0} lookup is not configured")]
    NotConfigured(&'static str),
    #[error("{service} lookup request failed: {message}")]
    Request { service: &'static str, message: String },
    #[error("{service} lookup returned no result: {message}")]
    Unavailable { service: &'static str, message: String },
}

/// Geocoding and square-footage estimation for an address.
#[async_trait]
pub trait PropertyLookup: Send + Sync {
    /// Driving distance from the business, in miles.
    async fn distance(&self, address: &str) -> Result<Decimal, LookupError>;

    /// `Ok(None)` means the estimator answered but wants the customer to type
    /// the square footage in.
    async fn estimate(&self, address: &str) -> Result<Option<PropertyEstimate>, LookupError>;
}

#[derive(Serialize)]
struct AddressRequest<'a> {
    address: &'a str,
}

#[derive(Deserialize)]
struct DistanceResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    distance: Option<Decimal>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimateResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<EstimateData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    needs_manual_entry: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimateData {
    estimated_square_footage: f64,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    source: Option<String>,
}

/// Calls the distance and estimate services configured under `[geo]`.
pub struct HttpPropertyLookup {
    client: reqwest::Client,
    distance_url: Option<String>,
    estimate_url: Option<String>,
}

impl HttpPropertyLookup {
    pub fn from_config(config: &GeoConfig) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LookupError::Request { service: "geo", message: e.to_string() })?;
        Ok(Self {
            client,
            distance_url: config.distance_url.clone(),
            estimate_url: config.estimate_url.clone(),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        service: &'static str,
        url: &str,
        address: &str,
    ) -> Result<T, LookupError> {
        let response = self
            .client
            .post(url)
            .json(&AddressRequest { address })
            .send()
            .await
            .map_err(|e| LookupError::Request { service, message: e.to_string() })?;
        response.json().await.map_err(|e| LookupError::Request { service, message: e.to_string() })
    }
}

#[async_trait]
impl PropertyLookup for HttpPropertyLookup {
    async fn distance(&self, address: &str) -> Result<Decimal, LookupError> {
        let url = self.distance_url.as_deref().ok_or(LookupError::NotConfigured("distance"))?;
        let body: DistanceResponse = self.post("distance", url, address).await?;
        match body {
            DistanceResponse { success: true, distance: Some(distance), .. } => Ok(distance),
            DistanceResponse { error, .. } => Err(LookupError::Unavailable {
                service: "distance",
                message: error.unwrap_or_else(|| "no distance in response".to_string()),
            }),
        }
    }

    async fn estimate(&self, address: &str) -> Result<Option<PropertyEstimate>, LookupError> {
        let url = self.estimate_url.as_deref().ok_or(LookupError::NotConfigured("estimate"))?;
        let body: EstimateResponse = self.post("estimate", url, address).await?;
        if body.needs_manual_entry {
            return Ok(None);
        }
        match body {
            EstimateResponse { success: true, data: Some(data), .. } => Ok(estimate_from(data)),
            EstimateResponse { error, .. } => Err(LookupError::Unavailable {
                service: "estimate",
                message: error.unwrap_or_else(|| "no estimate in response".to_string()),
            }),
        }
    }
}

fn estimate_from(data: EstimateData) -> Option<PropertyEstimate> {
    let rounded = data.estimated_square_footage.round();
    if !rounded.is_finite() || rounded <= 0.0 || rounded > f64::from(u32::MAX) {
        return None;
    }
    Some(PropertyEstimate {
        square_footage: rounded as u32,
        confidence: data.confidence,
        source: data.source.unwrap_or_else(|| "estimate".to_string()),
    })
}

/// Fixed answers, for tests and offline runs.
#[derive(Clone, Debug, Default)]
pub struct StaticPropertyLookup {
    pub distance: Option<Decimal>,
    pub estimate: Option<PropertyEstimate>,
}

impl StaticPropertyLookup {
    pub fn new(distance: Option<Decimal>, square_footage: Option<u32>) -> Self {
        Self {
            distance,
            estimate: square_footage.map(|square_footage| PropertyEstimate {
                square_footage,
                confidence: Some(0.9),
                source: "static".to_string(),
            }),
        }
    }
}

#[async_trait]
impl PropertyLookup for StaticPropertyLookup {
    async fn distance(&self, _address: &str) -> Result<Decimal, LookupError> {
        self.distance.ok_or(LookupError::Unavailable {
            service: "distance",
            message: "address not found".to_string(),
        })
    }

    async fn estimate(&self, _address: &str) -> Result<Option<PropertyEstimate>, LookupError> {
        Ok(self.estimate.clone())
    }
}

#[cfg(test)]
mod tests {
    use clearview_core::config::GeoConfig;

    use super::*;

    #[test]
    fn estimate_response_parses_provider_shape() {
        let body: EstimateResponse = serde_json::from_str(
            r#"{"success":true,"data":{"estimatedSquareFootage":2143.6,"confidence":0.7,"source":"county"}}"#,
        )
        .expect("parse");
        let estimate = body.data.and_then(estimate_from).expect("estimate");

        assert_eq!(estimate.square_footage, 2144);
        assert_eq!(estimate.source, "county");
    }

    #[test]
    fn manual_entry_flag_parses() {
        let body: EstimateResponse =
            serde_json::from_str(r#"{"success":false,"needsManualEntry":true,"error":"no parcel"}"#)
                .expect("parse");
        assert!(body.needs_manual_entry);
        assert!(body.data.is_none());
    }

    #[test]
    fn non_positive_estimates_are_discarded() {
        let data = EstimateData { estimated_square_footage: 0.0, confidence: None, source: None };
        assert!(estimate_from(data).is_none());
    }

    #[tokio::test]
    async fn unconfigured_http_lookup_reports_not_configured() {
        let lookup = HttpPropertyLookup::from_config(&GeoConfig {
            distance_url: None,
            estimate_url: None,
            timeout_secs: 2,
        })
        .expect("client");

        assert_eq!(
            lookup.distance("1 Main St").await,
            Err(LookupError::NotConfigured("distance"))
        );
        assert_eq!(
            lookup.estimate("1 Main St").await,
            Err(LookupError::NotConfigured("estimate"))
        );
    }

    #[tokio::test]
    async fn static_lookup_without_distance_fails() {
        let lookup = StaticPropertyLookup::new(None, Some(2000));
        assert!(lookup.distance("1 Main St").await.is_err());
        let estimate = lookup.estimate("1 Main St").await.expect("estimate");
        assert_eq!(estimate.map(|estimate| estimate.square_footage), Some(2000));
    }
}
