//! Harvest job configuration
//!
//! All values are resolved once at startup (see [`crate::cli`]) and passed to
//! the components by value. Nothing here is mutated after validation.

use crate::sparql::GraphIri;
use dha_common::error::parse_http_url;
use dha_common::units::{kib_to_bytes, mib_to_bytes};
use dha_common::{DhaError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

// ============================================================================
// Defaults
// ============================================================================

/// Separator between the parts of an OAI-PMH connection string
pub const CONNECTION_DELIMITER: char = '#';

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Default maximum size of a single SPARQL UPDATE payload, in KiB
pub const DEFAULT_BATCH_SIZE_KIB: u64 = 150;

/// Default cap on a single OAI-PMH response body, in MiB
pub const DEFAULT_MAX_RESPONSE_SIZE_MIB: u64 = 256;

/// Default number of times a failing SPARQL UPDATE is repeated
pub const DEFAULT_SPARQL_RETRIES: u32 = 2;

/// OAI-PMH endpoint, metadata prefix and optional set
///
/// Parsed from `"{endpoint URL}#{metadataPrefix}#{set name (optional)}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaiPmhConnection {
    endpoint: Url,
    metadata_prefix: String,
    set: Option<String>,
}

impl OaiPmhConnection {
    pub fn new(endpoint: Url, metadata_prefix: impl Into<String>, set: Option<String>) -> Self {
        Self {
            endpoint,
            metadata_prefix: metadata_prefix.into(),
            set: set.filter(|s| !s.is_empty()),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn metadata_prefix(&self) -> &str {
        &self.metadata_prefix
    }

    pub fn set(&self) -> Option<&str> {
        self.set.as_deref()
    }

    /// The named graph that mirrors this endpoint in the triplestore
    pub fn graph_iri(&self) -> Result<GraphIri> {
        GraphIri::parse(self.endpoint.as_str())
    }
}

impl FromStr for OaiPmhConnection {
    type Err = DhaError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, CONNECTION_DELIMITER);
        let endpoint = parts.next().unwrap_or_default().trim();
        let prefix = parts.next().map(str::trim).unwrap_or_default();
        let set = parts.next().map(|s| s.trim().to_string());

        if endpoint.is_empty() {
            return Err(DhaError::config("OAI-PMH connection string has no endpoint URL"));
        }
        if prefix.is_empty() {
            return Err(DhaError::config(format!(
                "OAI-PMH connection string '{}' has no metadata prefix; expected \"{{URL}}{d}{{metadataPrefix}}{d}{{set (optional)}}\"",
                s,
                d = CONNECTION_DELIMITER
            )));
        }

        Ok(Self::new(parse_http_url(endpoint)?, prefix, set))
    }
}

/// HTTP basic authentication credential for the triplestore
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

impl BasicAuth {
    /// Combine optional user and password
    ///
    /// Both or neither must be given; empty strings count as absent.
    pub fn from_parts(user: Option<String>, password: Option<String>) -> Result<Option<Self>> {
        let user = user.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());
        match (user, password) {
            (Some(user), Some(password)) => Ok(Some(Self { user, password })),
            (None, None) => Ok(None),
            _ => Err(DhaError::config(
                "triplestore user and password must be provided together",
            )),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Triplestore connection and write policy
#[derive(Debug, Clone)]
pub struct SparqlConfig {
    /// SPARQL endpoint receiving both queries and updates
    pub endpoint: Url,
    pub auth: Option<BasicAuth>,
    pub timeout: Duration,
    /// Byte budget of a single INSERT DATA payload
    pub batch_bytes: u64,
    /// Extra attempts after a failed update
    pub retries: u32,
    /// Skip a batch that keeps failing instead of aborting the import
    pub continue_on_failure: bool,
}

impl SparqlConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            auth: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            batch_bytes: kib_to_bytes(DEFAULT_BATCH_SIZE_KIB),
            retries: DEFAULT_SPARQL_RETRIES,
            continue_on_failure: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(DhaError::config("timeout must be greater than 0"));
        }
        if self.batch_bytes == 0 {
            return Err(DhaError::config("SPARQL batch size must be greater than 0"));
        }
        Ok(())
    }
}

/// Parameters of one OAI-PMH to triplestore synchronisation run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub source: OaiPmhConnection,
    /// OAI-PMH request timeout
    pub timeout: Duration,
    /// Largest OAI-PMH response body accepted, in bytes
    pub max_response_bytes: u64,
    pub sparql: SparqlConfig,
    /// Restrict the run to a single record
    pub record_id: Option<String>,
    /// Directory holding the spool file while the job runs
    pub spool_dir: PathBuf,
}

impl HarvestConfig {
    pub fn new(source: OaiPmhConnection, sparql: SparqlConfig) -> Self {
        Self {
            source,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_response_bytes: mib_to_bytes(DEFAULT_MAX_RESPONSE_SIZE_MIB),
            sparql,
            record_id: None,
            spool_dir: PathBuf::from("."),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(DhaError::config("OAI-PMH timeout must be greater than 0"));
        }
        if self.max_response_bytes == 0 {
            return Err(DhaError::config("OAI-PMH response size limit must be greater than 0"));
        }
        self.sparql.validate()?;
        self.source.graph_iri()?;
        if let Some(id) = &self.record_id {
            if id.trim().is_empty() {
                return Err(DhaError::config("OAI-PMH record id cannot be empty"));
            }
        }
        if !self.spool_dir.is_dir() {
            return Err(DhaError::config(format!(
                "spool directory '{}' does not exist or is not a directory",
                self.spool_dir.display()
            )));
        }
        Ok(())
    }

    pub fn graph_iri(&self) -> Result<GraphIri> {
        self.source.graph_iri()
    }
}

/// Parameters of a vocabulary enrichment run
#[derive(Debug, Clone)]
pub struct VocabularyConfig {
    pub sparql: SparqlConfig,
    /// URI prefix identifying the concepts to dereference
    pub namespace: String,
    /// Only look for references inside this graph
    pub graph: Option<GraphIri>,
}

impl VocabularyConfig {
    pub fn validate(&self) -> Result<()> {
        self.sparql.validate()?;
        if self.namespace.trim().is_empty() {
            return Err(DhaError::config("concepts namespace cannot be empty"));
        }
        Ok(())
    }
}
