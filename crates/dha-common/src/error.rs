//! Error types shared by the DHA tools

use thiserror::Error;

/// Result type alias for DHA operations
pub type Result<T> = std::result::Result<T, DhaError>;

/// Configuration and environment errors
#[derive(Error, Debug)]
pub enum DhaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid IRI '{iri}': {reason}")]
    InvalidIri { iri: String, reason: String },
}

impl DhaError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid IRI error
    pub fn invalid_iri(iri: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidIri {
            iri: iri.into(),
            reason: reason.to_string(),
        }
    }
}

/// Parse an absolute HTTP(S) URL, reporting failures as [`DhaError::InvalidUrl`]
pub fn parse_http_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|e| DhaError::invalid_url(raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(DhaError::invalid_url(
            raw,
            format!("unsupported scheme '{}', expected http or https", other),
        )),
    }
}
