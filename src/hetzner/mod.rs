//! Hetzner Cloud implementation of the control-plane traits.

mod actions;
mod error;
mod servers;
mod types;
mod volumes;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::Backend;
use crate::config::DriverConfig;
use types::ApiErrorBody;

pub use error::HetznerError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 50;

/// Label attached to every volume this driver creates.
pub const VOLUME_LABEL: &str = "docker-volume-hetzner";

/// Backend that manages volumes through the Hetzner Cloud REST API.
#[derive(Clone, Debug)]
pub struct HetznerBackend {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    poll_interval: Duration,
}

impl HetznerBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HetznerError::Config`] when the configuration fails
    /// validation, or [`HetznerError::Transport`] when the HTTP client
    /// cannot be built.
    pub fn new(config: &DriverConfig) -> Result<Self, HetznerError> {
        config.validate()?;
        Self::with_endpoint(
            config.api_endpoint.trim(),
            config.token(),
            config.poll_interval(),
        )
    }

    /// Constructs a backend for an explicit endpoint and token.
    ///
    /// # Errors
    ///
    /// Returns [`HetznerError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn with_endpoint(
        endpoint: &str,
        token: &str,
        poll_interval: Duration,
    ) -> Result<Self, HetznerError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| HetznerError::Transport {
                url: endpoint.to_owned(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            poll_interval,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, HetznerError> {
        let url = self.url(path);
        let response = Self::send(&url, self.request(Method::GET, &url).query(query)).await?;
        Self::decode(&url, response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, HetznerError> {
        let url = self.url(path);
        let response = Self::send(&url, self.request(Method::POST, &url).json(body)).await?;
        Self::decode(&url, response).await
    }

    async fn delete(&self, path: &str) -> Result<(), HetznerError> {
        let url = self.url(path);
        let response = Self::send(&url, self.request(Method::DELETE, &url)).await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn send(url: &str, builder: RequestBuilder) -> Result<Response, HetznerError> {
        builder.send().await.map_err(|err| HetznerError::Transport {
            url: url.to_owned(),
            message: err.to_string(),
        })
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, HetznerError> {
        let checked = Self::check_status(response).await?;
        checked.json::<T>().await.map_err(|err| HetznerError::Decode {
            url: url.to_owned(),
            message: err.to_string(),
        })
    }

    async fn check_status(response: Response) -> Result<Response, HetznerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or_else(|_| types::ApiErrorDetail {
                code: String::from("unknown"),
                message: text,
            });
        Err(HetznerError::Api {
            status: status.as_u16(),
            code: detail.code,
            message: detail.message,
        })
    }
}

impl Backend for HetznerBackend {
    type Error = HetznerError;
}

#[cfg(test)]
mod tests;
