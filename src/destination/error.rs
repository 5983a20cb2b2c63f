// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination error taxonomy.
//!
//! | Status | Kind |
//! |--------|------|
//! | 401, 403 | `Unauthorized` |
//! | 404 | `NotFound` |
//! | 409, 422 | `Validation` |
//! | 429 | `RateLimited` |
//! | other non-2xx | `Other` |
//!
//! Connection, DNS and timeout failures never reach a status code and are
//! reported as [`DestinationError::Transport`].

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Classification of a non-success destination response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    NotFound,
    Validation,
    RateLimited,
    Other,
}

impl ApiErrorKind {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            409 | 422 => Self::Validation,
            429 => Self::RateLimited,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NotFound => write!(f, "not found"),
            Self::Validation => write!(f, "validation failed"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Other => write!(f, "api error"),
        }
    }
}

/// A non-success response from a destination.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status: u16,
    pub code: Option<String>,
    pub category: Option<String>,
    pub correlation_id: Option<String>,
    pub details: Option<Value>,
    /// Raw response body.
    pub body: String,
}

impl ApiError {
    /// Build an error with only kind, status and message set.
    pub fn new(kind: ApiErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
            code: None,
            category: None,
            correlation_id: None,
            details: None,
            body: String::new(),
        }
    }

    /// Build an error from a status and raw response body.
    ///
    /// Structured fields are pulled from a JSON body when it parses; otherwise
    /// the message falls back to `"HTTP <status>"`.
    pub fn from_response(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let kind = ApiErrorKind::from_status(status);
        let parsed: Option<Value> = serde_json::from_str(&body).ok().filter(Value::is_object);

        let field = |name: &str| -> Option<String> {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };

        let message = field("message").unwrap_or_else(|| format!("HTTP {status}"));
        let details = parsed.as_ref().and_then(|v| {
            v.get("errors")
                .or_else(|| v.get("context"))
                .or_else(|| v.get("details"))
                .cloned()
        });

        Self {
            kind,
            message,
            status,
            code: field("code").or_else(|| field("subCategory")),
            category: field("category"),
            correlation_id: field("correlationId"),
            details,
            body,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ApiErrorKind::RateLimited) || self.status >= 500
    }
}

/// Errors raised by destination adapters.
#[derive(Error, Debug, Clone)]
pub enum DestinationError {
    /// The request never got a response.
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: String, message: String },

    /// The destination answered with a non-success status.
    #[error("API error, {} ({}): {}", .0.kind, .0.status, .0.message)]
    Api(#[from] ApiError),
}

impl DestinationError {
    pub fn transport(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The API error, if the destination responded.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            Self::Transport { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api(e) => e.is_retryable(),
        }
    }
}
