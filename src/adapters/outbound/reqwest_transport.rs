//! Reqwest Transport
//!
//! Implements Transport with reqwest. Tunneled endpoints get a client
//! configured with the endpoint as proxy; direct endpoints share one
//! proxy-less client.

use crate::domain::entities::Endpoint;
use crate::domain::errors::TransportError;
use crate::domain::ports::{OutboundRequest, Transport, TransportResponse};
use crate::domain::value_objects::{ProxyProtocol, TransportMode};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Proxy, Url};
use std::collections::HashMap;

/// reqwest-backed transport.
///
/// Proxy clients are cached by proxy URL so connection pools survive
/// between attempts through the same endpoint.
pub struct ReqwestTransport {
    direct: Client,
    tunneled: DashMap<String, Client>,
}

impl ReqwestTransport {
    /// Create a new transport.
    pub fn new() -> Result<Self, TransportError> {
        let direct = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| TransportError::Proxy(format!("client error: {}", e)))?;

        Ok(Self {
            direct,
            tunneled: DashMap::new(),
        })
    }

    /// Proxy URL for an endpoint, credentials included.
    pub fn proxy_url(endpoint: &Endpoint) -> Result<Url, TransportError> {
        if endpoint.protocol == ProxyProtocol::Socks4 {
            return Err(TransportError::Proxy(format!(
                "endpoint {}: socks4 is not supported by the HTTP client",
                endpoint.id
            )));
        }

        let mut url = Url::parse(&format!(
            "{}://{}",
            endpoint.protocol.scheme(),
            endpoint.address()
        ))
        .map_err(|e| TransportError::Proxy(format!("endpoint {}: {}", endpoint.id, e)))?;

        if let Some(credentials) = &endpoint.credentials {
            url.set_username(&credentials.username)
                .and_then(|_| url.set_password(Some(&credentials.password)))
                .map_err(|_| {
                    TransportError::Proxy(format!(
                        "endpoint {}: credentials cannot be encoded",
                        endpoint.id
                    ))
                })?;
        }

        Ok(url)
    }

    fn client_for(&self, endpoint: &Endpoint) -> Result<Client, TransportError> {
        if endpoint.transport == TransportMode::Direct {
            return Ok(self.direct.clone());
        }

        let url = Self::proxy_url(endpoint)?;
        if let Some(client) = self.tunneled.get(url.as_str()) {
            return Ok(client.clone());
        }

        let proxy = Proxy::all(url.clone())
            .map_err(|e| TransportError::Proxy(format!("endpoint {}: {}", endpoint.id, e)))?;
        let client = Client::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| TransportError::Proxy(format!("client error: {}", e)))?;

        self.tunneled.insert(url.to_string(), client.clone());
        Ok(client)
    }

    fn classify(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client_for(endpoint)?;

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(Self::classify)?;

        let status = resp.status();
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in resp.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let body = resp.bytes().await.map_err(Self::classify)?;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
        })
    }
}
