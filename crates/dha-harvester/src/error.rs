//! Error types for the harvesting pipeline
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`RecordError`] covers everything that can go wrong with a single
//!   OAI-PMH record. The job logs it, counts it and moves on.
//! - [`JobError`] ends the job. It is only produced by listing, graph
//!   replacement, strict-mode sync failures and local resource problems.
//!
//! Call sites that handle one record can therefore never bubble an error up
//! as a job-ending fault by accident: the types do not convert into each
//! other.

use reqwest::StatusCode;
use thiserror::Error;

/// Longest body excerpt carried inside an error message
const BODY_EXCERPT_LEN: usize = 2048;

/// Result type for OAI-PMH calls
pub type OaiResult<T> = std::result::Result<T, OaiPmhError>;

/// Failures of a single OAI-PMH verb call
#[derive(Debug, Error)]
pub enum OaiPmhError {
    /// Connection refused, DNS failure, read timeout
    #[error("OAI-PMH endpoint unreachable or timed out: {0}")]
    Transport(#[source] reqwest::Error),

    /// Non-200 status, unparsable XML or an `<error>` element
    #[error("OAI-PMH protocol error: {message}")]
    Protocol { message: String, body: String },

    /// Response was valid but did not have the expected structure
    #[error("Malformed OAI-PMH record '{identifier}': {reason}")]
    MalformedRecord { identifier: String, reason: String },
}

impl OaiPmhError {
    pub fn protocol(message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            body: body.into(),
        }
    }

    pub fn malformed(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Response body (or offending payload) kept for diagnostics
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Protocol { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Failures converting RDF payloads to triples
#[derive(Debug, Error)]
pub enum RdfError {
    #[error("RDF parse error: {message}")]
    Parse { message: String, fragment: String },

    #[error("Invalid IRI '{iri}': {reason}")]
    InvalidIri { iri: String, reason: String },
}

impl RdfError {
    pub fn parse(message: impl ToString, fragment: impl Into<String>) -> Self {
        Self::Parse {
            message: message.to_string(),
            fragment: fragment.into(),
        }
    }
}

/// Failures talking to the SPARQL endpoint
#[derive(Debug, Error)]
pub enum SparqlError {
    #[error("Triplestore unreachable or timed out: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Triplestore answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Unexpected triplestore response: {0}")]
    InvalidResponse(String),
}

impl SparqlError {
    pub fn status(status: StatusCode, body: &str) -> Self {
        Self::Status {
            status,
            body: excerpt(body),
        }
    }
}

/// A triplestore write that still failed after all retries
#[derive(Debug, Error)]
#[error("Triplestore update failed after {attempts} attempt(s): {source}")]
pub struct SyncFailure {
    pub attempts: u32,
    #[source]
    pub source: SparqlError,
}

/// Per-record failure: logged, counted, never fatal
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Source(#[from] OaiPmhError),

    #[error(transparent)]
    Rdf(#[from] RdfError),
}

impl RecordError {
    /// Payload worth logging so the record can be re-harvested by hand
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Source(e) => e.body(),
            Self::Rdf(RdfError::Parse { fragment, .. }) => Some(fragment),
            Self::Rdf(RdfError::InvalidIri { .. }) => None,
        }
    }

    /// Short classification used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source(OaiPmhError::Transport(_)) => "transport",
            Self::Source(OaiPmhError::Protocol { .. }) => "protocol",
            Self::Source(OaiPmhError::MalformedRecord { .. }) => "malformed_record",
            Self::Rdf(_) => "parse",
        }
    }
}

/// Failure enriching one vocabulary concept: logged, counted, never fatal
#[derive(Debug, Error)]
pub enum ConceptError {
    #[error("Concept URI cannot be dereferenced: {0}")]
    InvalidUri(#[source] dha_common::DhaError),

    #[error("Fetching concept failed: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("Concept server answered {0}")]
    Status(StatusCode),

    #[error(transparent)]
    Rdf(#[from] RdfError),

    #[error(transparent)]
    Sync(#[from] SyncFailure),
}

/// Job-ending failure
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] dha_common::DhaError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Listing identifiers failed: {0}")]
    Listing(#[source] OaiPmhError),

    #[error("No records found at the OAI-PMH endpoint")]
    NoRecords,

    #[error("None of the {attempted} record(s) could be harvested; triplestore left untouched")]
    NothingHarvested { attempted: usize },

    #[error("Clearing graph {graph} failed: {source}")]
    ReplaceGraph {
        graph: String,
        #[source]
        source: SyncFailure,
    },

    #[error("Triplestore import aborted at batch {batch} (cleanup {}): {source}", cleanup_outcome(.cleanup_succeeded))]
    SyncAborted {
        batch: usize,
        cleanup_succeeded: bool,
        #[source]
        source: SyncFailure,
    },

    #[error("Querying the triplestore failed: {0}")]
    Query(#[source] SparqlError),

    #[error("Spool file error: {0}")]
    Spool(#[from] std::io::Error),
}

fn cleanup_outcome(succeeded: &bool) -> &'static str {
    if *succeeded {
        "succeeded"
    } else {
        "failed"
    }
}

/// Truncate a response body for inclusion in an error message
pub(crate) fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &body[..end], body.len())
}
