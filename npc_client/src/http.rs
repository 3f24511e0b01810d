//! HTTP transport.
//!
//! JSON over HTTP against the reference backend. Read-only routes are sent as
//! `GET` without a body; everything else is a `POST` with a JSON body.
//! Non-2xx answers become `TransportError::Status` with the backend's
//! `detail` text. Route segments are percent-encoded, so an actor id can
//! never change which path is requested.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use npc_shared::{config::ClientConfig, protocol::Route};
use serde_json::Value;
use tracing::debug;

use crate::transport::{error_detail, Transport, TransportError};

/// Production transport using reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpTransport {
    /// Creates a transport for `base_url`. `timeout` of `None` means requests
    /// wait as long as the backend takes.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let base_url = base_url.into();
        let base_url = reqwest::Url::parse(&base_url)
            .with_context(|| format!("parse api url {base_url:?}"))?;
        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "api url {base_url} cannot carry a path"
        );
        let client = builder.build().context("build http client")?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(cfg: &ClientConfig) -> anyhow::Result<Self> {
        Self::new(cfg.api_url.clone(), cfg.request_timeout())
    }

    /// Full URL for a route, below any path the base URL already has.
    pub fn url(&self, route: &Route) -> Result<reqwest::Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::Encode {
                route: route.path(),
                reason: format!("{} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(route.segments());
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, route: &Route, payload: Value) -> Result<Value, TransportError> {
        let url = self.url(route)?;
        let request = if route.is_read_only() {
            self.client.get(url.clone())
        } else {
            self.client.post(url.clone()).json(&payload)
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::connection(route, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::connection(route, e))?;
        debug!(%url, status = status.as_u16(), bytes = text.len(), "HTTP exchange complete");

        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&text)
                .map(|body| error_detail(&body))
                .unwrap_or(text);
            return Err(TransportError::status(route, status.as_u16(), detail));
        }

        serde_json::from_str(&text).map_err(|e| TransportError::decode(route, e))
    }
}
