//! Transport Port
//!
//! Defines how a single HTTP attempt is carried to its target,
//! either tunneled through a proxy endpoint or issued directly.

use crate::domain::entities::Endpoint;
use crate::domain::errors::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// One outbound HTTP request as seen by a transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    /// Bodyless GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }
}

/// Raw response returned by a transport.
///
/// Any HTTP status is a valid response at this layer.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Declared content type, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Carries one request attempt through an endpoint.
///
/// Implementations report connection-level failures only; non-2xx
/// responses are returned as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError>;
}
