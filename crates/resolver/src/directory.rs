//! Directory-service client

use crate::errors::{ResolverError, Result};
use async_trait::async_trait;
use atgraph_types::{Did, Handle};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait Directory: Send + Sync {
    /// One export-feed page after `cursor`, as raw newline-delimited JSON
    /// records. An empty page means the feed is exhausted.
    async fn export(&self, after: Option<&str>, count: usize) -> Result<Vec<String>>;

    /// The directory's current DID for a handle, if any.
    async fn resolve_handle(&self, handle: &Handle) -> Result<Option<String>>;

    /// Canonical handle for a DID via its directory document, if any.
    async fn resolve_did(&self, did: &Did) -> Result<Option<Handle>>;
}

/// PLC-style directory over HTTP
#[derive(Clone)]
pub struct PlcDirectory {
    base: Url,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ResolvedHandle {
    did: String,
}

#[derive(Deserialize)]
struct DirectoryDocument {
    #[serde(default, rename = "alsoKnownAs")]
    also_known_as: Vec<String>,
}

impl PlcDirectory {
    pub fn new(base: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_http_client(base, http)
    }

    /// Use an existing reqwest client (useful for custom TLS or middleware).
    pub fn with_http_client(base: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        let mut base = Url::parse(base.as_ref())?;
        if !base.path().ends_with('/') {
            let mut path = base.path().trim_end_matches('/').to_owned();
            path.push('/');
            base.set_path(&path);
        }
        Ok(Self { base, http })
    }
}

#[async_trait]
impl Directory for PlcDirectory {
    async fn export(&self, after: Option<&str>, count: usize) -> Result<Vec<String>> {
        let mut url = self.base.join("export")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("count", &count.to_string());
            if let Some(cursor) = after {
                query.append_pair("after", cursor);
            }
        }
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ResolverError::Status {
                status: response.status().as_u16(),
                endpoint: url.to_string(),
            });
        }
        let body = response.text().await?;
        Ok(body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn resolve_handle(&self, handle: &Handle) -> Result<Option<String>> {
        let mut url = self.base.join("xrpc/com.atproto.identity.resolveHandle")?;
        url.query_pairs_mut().append_pair("handle", handle.as_str());
        let response = self.http.get(url.clone()).send().await?;
        match response.status() {
            StatusCode::OK => {
                let resolved: ResolvedHandle = response.json().await?;
                Ok(Some(resolved.did))
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Ok(None),
            status => Err(ResolverError::Status {
                status: status.as_u16(),
                endpoint: url.to_string(),
            }),
        }
    }

    async fn resolve_did(&self, did: &Did) -> Result<Option<Handle>> {
        // "./" keeps the DID's colons from reading as a URL scheme.
        let url = self.base.join(&format!("./{}", did.as_str()))?;
        let response = self.http.get(url.clone()).send().await?;
        match response.status() {
            StatusCode::OK => {
                let document: DirectoryDocument = response.json().await?;
                Ok(document
                    .also_known_as
                    .iter()
                    .find(|aka| aka.starts_with("at://"))
                    .map(Handle::new))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status => Err(ResolverError::Status {
                status: status.as_u16(),
                endpoint: url.to_string(),
            }),
        }
    }
}
