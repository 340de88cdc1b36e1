//! HTTP client for a SPARQL 1.1 endpoint
//!
//! Queries and updates are sent as `application/x-www-form-urlencoded` POST
//! requests (`query=` / `update=`), the form every common triplestore
//! accepts on its main endpoint.

use crate::config::{BasicAuth, SparqlConfig};
use crate::error::SparqlError;
use crate::sparql::query::{SelectQuery, UpdateQuery};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;
use url::Url;

/// Media type of SPARQL JSON results
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Anything that can apply a SPARQL UPDATE
///
/// The sync layer only needs this one operation, which keeps it testable
/// against an in-memory store.
#[async_trait]
pub trait SparqlUpdate: Send + Sync {
    async fn update(&self, query: &UpdateQuery) -> Result<(), SparqlError>;
}

/// One value bound in a result row
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// One result row, keyed by variable name
pub type Solution = HashMap<String, Binding>;

#[derive(Debug, Deserialize)]
struct SelectResponse {
    results: SelectResults,
}

#[derive(Debug, Deserialize)]
struct SelectResults {
    bindings: Vec<Solution>,
}

/// SPARQL protocol client
#[derive(Debug, Clone)]
pub struct SparqlClient {
    client: Client,
    endpoint: Url,
    auth: Option<BasicAuth>,
}

impl SparqlClient {
    pub fn new(config: &SparqlConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("dha-harvester/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth: config.auth.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Run a SELECT query and return its result rows
    pub async fn select(&self, query: &SelectQuery) -> Result<Vec<Solution>, SparqlError> {
        let started = Instant::now();
        let response = self
            .post(("query", query.as_str()))
            .header(header::ACCEPT, SPARQL_RESULTS_JSON)
            .send()
            .await
            .map_err(SparqlError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(SparqlError::Transport)?;
        if !status.is_success() {
            return Err(SparqlError::status(status, &body));
        }

        let parsed: SelectResponse = serde_json::from_str(&body)
            .map_err(|e| SparqlError::InvalidResponse(format!("not SPARQL JSON results: {}", e)))?;
        debug!(
            rows = parsed.results.bindings.len(),
            elapsed = ?started.elapsed(),
            "SELECT finished"
        );
        Ok(parsed.results.bindings)
    }

    fn post(&self, field: (&str, &str)) -> reqwest::RequestBuilder {
        let request = self.client.post(self.endpoint.clone()).form(&[field]);
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.user, Some(&auth.password)),
            None => request,
        }
    }
}

#[async_trait]
impl SparqlUpdate for SparqlClient {
    async fn update(&self, query: &UpdateQuery) -> Result<(), SparqlError> {
        let started = Instant::now();
        let response = self
            .post(("update", query.as_str()))
            .send()
            .await
            .map_err(SparqlError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => format!("<body unreadable: {}>", e),
            };
            return Err(SparqlError::status(status, &body));
        }
        debug!(
            kind = ?query.kind(),
            bytes = query.as_str().len(),
            elapsed = ?started.elapsed(),
            "UPDATE accepted"
        );
        Ok(())
    }
}
