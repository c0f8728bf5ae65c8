//! HTTP client for the HomeKit bridge API.
//!
//! Two endpoints are consumed:
//! - `GET /list/rooms` for room discovery
//! - `GET /info/{target}` for the accessories of a room (or a single accessory)
//!
//! Every failure is returned as a [`BridgeError`]; there is no retry here.

use std::time::Duration;

use homekit_common::{DeviceRecord, RoomEntry};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::ConnectionConfig;

/// Errors returned by the bridge client.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Connection refused, DNS failure, timeout, or broken body stream.
    #[error("Bridge unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The bridge answered with a non-2xx status.
    #[error("Bridge returned HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    /// The body was not the JSON shape we expect.
    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    /// The configured base URL cannot carry path segments.
    #[error("Invalid bridge URL: {0}")]
    InvalidUrl(String),

    /// The underlying HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Client for a single bridge.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: Url,
}

impl BridgeClient {
    /// Build a client from connection settings.
    pub fn new(config: &ConnectionConfig) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("homekit-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BridgeError::Client)?;

        Self::from_reqwest(&config.base_url(), http)
    }

    /// Build a client around an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, BridgeError> {
        let base_url =
            Url::parse(base_url).map_err(|e| BridgeError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List the rooms known to the bridge.
    pub async fn list_rooms(&self) -> Result<Vec<String>, BridgeError> {
        let url = self.endpoint(&["list", "rooms"])?;
        let body = self.get_json(&url).await?;

        let rooms: Vec<RoomEntry> =
            serde_json::from_value(body).map_err(|e| BridgeError::MalformedResponse {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(rooms.into_iter().map(RoomEntry::into_name).collect())
    }

    /// Fetch the accessory records for a room or accessory name.
    ///
    /// The bridge answers with either a single object or an array. Array
    /// entries that do not decode are skipped with a warning.
    pub async fn devices_for(&self, target: &str) -> Result<Vec<DeviceRecord>, BridgeError> {
        let url = self.endpoint(&["info", target])?;
        let body = self.get_json(&url).await?;

        match body {
            Value::Array(items) => {
                let total = items.len();
                let records: Vec<DeviceRecord> = items
                    .into_iter()
                    .enumerate()
                    .filter_map(|(index, item)| match serde_json::from_value(item) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!(
                                target_name = %target,
                                index,
                                error = %e,
                                "Skipping undecodable accessory record"
                            );
                            None
                        }
                    })
                    .collect();
                debug!(
                    target_name = %target,
                    total,
                    decoded = records.len(),
                    "Fetched accessories"
                );
                Ok(records)
            }
            Value::Object(_) => {
                let record =
                    serde_json::from_value(body).map_err(|e| BridgeError::MalformedResponse {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(vec![record])
            }
            other => Err(BridgeError::MalformedResponse {
                url: url.to_string(),
                message: format!("expected object or array, got {}", json_kind(&other)),
            }),
        }
    }

    /// Build an endpoint URL. Each segment is percent-encoded on its own, so
    /// names containing spaces, slashes or punctuation stay one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BridgeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BridgeError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: &Url) -> Result<Value, BridgeError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BridgeError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|source| BridgeError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        serde_json::from_str(&text).map_err(|e| BridgeError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> BridgeClient {
        BridgeClient::from_reqwest(base, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_target() {
        let client = client("http://bridge.local:8423");
        let url = client.endpoint(&["info", "Living Room"]).unwrap();
        assert_eq!(url.as_str(), "http://bridge.local:8423/info/Living%20Room");
    }

    #[test]
    fn test_endpoint_encodes_slash_and_punctuation() {
        let client = client("http://bridge.local:8423");
        let url = client.endpoint(&["info", "Kids/Guest #2?"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://bridge.local:8423/info/Kids%2FGuest%20%232%3F"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = client("http://bridge.local:8423/api/");
        let url = client.endpoint(&["list", "rooms"]).unwrap();
        assert_eq!(url.as_str(), "http://bridge.local:8423/api/list/rooms");
    }

    #[test]
    fn test_new_from_connection_config() {
        let client = BridgeClient::new(&ConnectionConfig::default()).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8423/");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = BridgeClient::from_reqwest("not a url", reqwest::Client::new());
        assert!(matches!(result, Err(BridgeError::InvalidUrl(_))));

        let result =
            BridgeClient::from_reqwest("mailto:bridge@example.com", reqwest::Client::new());
        assert!(matches!(result, Err(BridgeError::InvalidUrl(_))));
    }

    #[test]
    fn test_json_kind() {
        assert_eq!(json_kind(&Value::Null), "null");
        assert_eq!(json_kind(&serde_json::json!(3)), "number");
        assert_eq!(json_kind(&serde_json::json!("x")), "string");
    }
}
