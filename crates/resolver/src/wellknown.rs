//! Well-known HTTPS source

use crate::errors::{ResolverError, Result};
use async_trait::async_trait;
use atgraph_types::Handle;
use reqwest::StatusCode;
use std::time::Duration;

#[async_trait]
pub trait WellKnown: Send + Sync {
    /// DID bound at `https://<handle>/.well-known/atproto-did`.
    ///
    /// A 400 response is a definitive negative and surfaces as
    /// [`ResolverError::NoBinding`]; callers must not retry it.
    async fn bound_did(&self, handle: &Handle) -> Result<String>;
}

/// reqwest-backed implementation
pub struct HttpWellKnown {
    http: reqwest::Client,
}

impl HttpWellKnown {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Use an existing reqwest client (useful for custom TLS or middleware).
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl WellKnown for HttpWellKnown {
    async fn bound_did(&self, handle: &Handle) -> Result<String> {
        let endpoint = format!("https://{}/.well-known/atproto-did", handle.as_str());
        let response = self.http.get(&endpoint).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                let did = body.trim();
                if did.starts_with("did:") {
                    Ok(did.to_string())
                } else {
                    Err(ResolverError::Malformed(format!(
                        "well-known body is not a DID: {did:.64}"
                    )))
                }
            }
            StatusCode::BAD_REQUEST => Err(ResolverError::NoBinding),
            status => Err(ResolverError::Status {
                status: status.as_u16(),
                endpoint,
            }),
        }
    }
}
