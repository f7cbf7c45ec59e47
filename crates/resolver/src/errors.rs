//! Error types for source lookups

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("dns error: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("handle has no well-known binding")]
    NoBinding,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ResolverError {
    /// Definitive outcomes short-circuit retries.
    pub fn is_definitive(&self) -> bool {
        matches!(self, ResolverError::NoBinding)
    }
}

pub type Result<T> = std::result::Result<T, ResolverError>;
