//! Thin PostgREST client shared by the content and subscription clients.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::ApiConfig;
use crate::ApiError;

/// HTTP client bound to one backend project.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    config: ApiConfig,
}

impl RestClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.config.endpoint(path)?;
        trace!(%method, %url, "Backend request");
        Ok(self
            .http
            .request(method, url)
            .header("apikey", &self.config.anon_key))
    }

    /// GET `path` with query pairs and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .request(reqwest::Method::GET, path)?
            .query(query)
            .send()
            .await?;
        let response = check_status(path, response)?;
        Ok(response.json().await?)
    }

    /// POST a JSON body to `path`, discarding the response body.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        prefer: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut request = self.request(reqwest::Method::POST, path)?.json(body);
        if let Some(prefer) = prefer {
            request = request.header("Prefer", prefer);
        }
        let response = request.send().await?;
        check_status(path, response)?;
        debug!(path, "Backend POST accepted");
        Ok(())
    }
}

fn check_status(path: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            endpoint: path.to_string(),
            status: status.as_u16(),
        })
    }
}
