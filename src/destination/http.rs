// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reference HTTP destination for CRM-objects style APIs.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | search | `POST {base}/crm/v3/objects/{type}/search` |
//! | update | `PATCH {base}/crm/v3/objects/{type}/{id}` |
//! | create | `POST {base}/crm/v3/objects/{type}` |
//! | delete | `DELETE {base}/crm/v3/objects/{type}/{id}` |
//!
//! # Upsert
//!
//! With an identity property present in the payload, the adapter first
//! searches for an object whose property equals the payload value. A hit is
//! updated in place (the identity property is not re-sent); a miss, or a 404
//! from search, creates a new object with the identity property re-injected.
//! Without an identity property the adapter always creates.
//!
//! Every request waits on a client-side token bucket so a batch run does not
//! trip the destination's own rate limit.

use super::{ApiError, ApiErrorKind, BoxFuture, Destination, DestinationError, DestinationResult};
use crate::config::HttpDestinationConfig;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::resilience::RateLimiter;
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// HTTP adapter with bearer-token auth.
pub struct HttpDestination {
    base_url: String,
    access_token: Option<String>,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl HttpDestination {
    pub fn new(config: &HttpDestinationConfig) -> Result<Self> {
        let trimmed = config.base_url.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Config("destination base_url is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Config(format!("Invalid HTTP client settings: {}", e)))?;

        Ok(Self {
            base_url: trimmed.trim_end_matches('/').to_string(),
            access_token: config
                .access_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            http,
            limiter: RateLimiter::new(config.rate_limit.clone()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and return status and body. Only transport failures are `Err`.
    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> DestinationResult<(u16, String)> {
        if !self.limiter.try_acquire() {
            debug!(operation, "Client-side rate limit reached, waiting");
            self.limiter.acquire().await;
        }
        let start = Instant::now();

        let response = builder.send().await.map_err(|e| {
            metrics::record_destination_request(operation, "transport_error", start.elapsed());
            transport_error(&e)
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        metrics::record_destination_request(operation, &status.to_string(), start.elapsed());
        debug!(operation, status, elapsed_ms = start.elapsed().as_millis() as u64, "Destination request complete");
        Ok((status, body))
    }

    async fn search(&self, object_type: &str, property: &str, value: &Value) -> DestinationResult<Option<String>> {
        let body = json!({
            "filterGroups": [{
                "filters": [{ "propertyName": property, "operator": "EQ", "value": value }]
            }],
            "limit": 1
        });
        let (status, text) = self
            .send("search", self.request(Method::POST, &format!("/crm/v3/objects/{object_type}/search")).json(&body))
            .await?;

        if status == 404 {
            return Ok(None);
        }
        if !is_success(status) {
            return Err(ApiError::from_response(status, text).into());
        }

        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(parsed
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(id_of))
    }

    async fn update(&self, object_type: &str, id: &str, properties: &Map<String, Value>) -> DestinationResult<String> {
        let (status, text) = self
            .send(
                "update",
                self.request(Method::PATCH, &format!("/crm/v3/objects/{object_type}/{id}"))
                    .json(&json!({ "properties": properties })),
            )
            .await?;
        if !is_success(status) {
            return Err(ApiError::from_response(status, text).into());
        }
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(id_of(&parsed).unwrap_or_else(|| id.to_string()))
    }

    async fn create(&self, object_type: &str, properties: &Map<String, Value>) -> DestinationResult<String> {
        let (status, text) = self
            .send(
                "create",
                self.request(Method::POST, &format!("/crm/v3/objects/{object_type}"))
                    .json(&json!({ "properties": properties })),
            )
            .await?;
        if !is_success(status) {
            return Err(ApiError::from_response(status, text).into());
        }
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        id_of(&parsed).ok_or_else(|| {
            let mut err = ApiError::new(ApiErrorKind::Other, status, "create response missing id");
            err.body = text;
            err.into()
        })
    }
}

impl Destination for HttpDestination {
    fn upsert<'a>(
        &'a self,
        object_type: &'a str,
        payload: &'a Map<String, Value>,
        identity_property: Option<&'a str>,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let (identity, mut properties) = split_identity(payload, identity_property);

            if let (Some(property), Some(value)) = (identity_property, identity.as_ref()) {
                if let Some(existing) = self.search(object_type, property, value).await? {
                    debug!(object_type, remote_id = %existing, "Matched existing object by identity");
                    return self.update(object_type, &existing, &properties).await;
                }
                properties.insert(property.to_string(), value.clone());
            }

            self.create(object_type, &properties).await
        })
    }

    fn delete<'a>(&'a self, object_type: &'a str, remote_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let (status, text) = self
                .send("delete", self.request(Method::DELETE, &format!("/crm/v3/objects/{object_type}/{remote_id}")))
                .await?;
            match status {
                s if is_success(s) => Ok(true),
                404 => {
                    warn!(object_type, remote_id, "Delete target already absent");
                    Ok(false)
                }
                s => Err(ApiError::from_response(s, text).into()),
            }
        })
    }
}

/// Pull the identity value out of the payload.
///
/// Returns the value (only when non-null and non-empty) and the remaining
/// properties.
fn split_identity(payload: &Map<String, Value>, identity_property: Option<&str>) -> (Option<Value>, Map<String, Value>) {
    let mut properties = payload.clone();
    let Some(property) = identity_property else {
        return (None, properties);
    };
    let value = properties.remove(property).filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    });
    (value, properties)
}

fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn transport_error(e: &reqwest::Error) -> DestinationError {
    let kind = if e.is_timeout() {
        "Timeout"
    } else if e.is_connect() {
        "Connect"
    } else if e.is_request() {
        "Request"
    } else if e.is_body() || e.is_decode() {
        "Body"
    } else {
        "Transport"
    };
    DestinationError::transport(kind, e.to_string())
}
