//! HTTP implementation of the worker's network seam.

use async_trait::async_trait;
use daily_bible_sw::{FetchRequest, FetchResponse, Network, ServiceWorkerError};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, warn};

use crate::ApiError;

/// Performs worker fetches over real HTTP.
///
/// Any HTTP status is a response; only transport failures are errors.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: Client,
}

impl HttpNetwork {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ServiceWorkerError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ServiceWorkerError::Network(format!("invalid method: {}", e)))?;

        let mut builder = self.http.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "Fetch failed");
            ServiceWorkerError::Network(e.to_string())
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceWorkerError::Network(e.to_string()))?;

        debug!(url = %request.url, status, bytes = body.len(), "Fetched");
        Ok(headers
            .iter()
            .fold(FetchResponse::new(status, body.to_vec()), |resp, (name, value)| {
                resp.with_header(name, value)
            }))
    }
}
