use crate::{config, RdmError, RdmSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::error;

const TARGET: &str = "rdm::client";

/// JSON access to the RDM file-store API. The seam every resolver and
/// mutator operation goes through, so tests can script the store.
#[async_trait]
pub trait RdmApi: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value>;
    async fn put_json(&self, url: &str, body: Option<&Value>) -> Result<Value>;
}

/// Bearer-authenticated HTTP implementation. Non-success responses are
/// surfaced as [`RdmError::Upstream`] carrying the upstream status code.
#[derive(Clone)]
pub struct RdmClient {
    http: Client,
    bearer: String,
}

impl RdmClient {
    pub fn for_session(session: &RdmSession) -> Result<Self> {
        let http = Client::builder()
            .timeout(config::http_timeout())
            .build()
            .context("building RDM http client")?;
        Ok(Self {
            http,
            bearer: session.access_token()?.to_string(),
        })
    }
}

#[async_trait]
impl RdmApi for RdmClient {
    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.bearer)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            error!(target: TARGET, %url, status = status.as_u16(), "RDM request failed");
            return Err(RdmError::Upstream {
                status: status.as_u16(),
            }
            .into());
        }
        resp.json().await.with_context(|| format!("decoding {}", url))
    }

    async fn put_json(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self.http.put(url).bearer_auth(&self.bearer);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("PUT {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            error!(target: TARGET, %url, status = status.as_u16(), "RDM request failed");
            return Err(RdmError::Upstream {
                status: status.as_u16(),
            }
            .into());
        }
        resp.json().await.with_context(|| format!("decoding {}", url))
    }
}
