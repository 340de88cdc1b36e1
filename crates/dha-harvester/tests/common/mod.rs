//! Shared fixtures: an OAI-PMH endpoint on wiremock and an in-memory
//! triplestore

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use dha_harvester::config::{HarvestConfig, SparqlConfig};
use dha_harvester::error::SparqlError;
use dha_harvester::oaipmh::OaiPmhClient;
use dha_harvester::sparql::{SparqlUpdate, SyncPolicy, TriplestoreSync, UpdateKind, UpdateQuery};
use dha_harvester::HarvestJob;
use reqwest::StatusCode;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PREFIX: &str = "oai_rdf";

// ============================================================================
// OAI-PMH fixtures
// ============================================================================

pub fn identifier(n: usize) -> String {
    format!("oai:example.org:{}", n)
}

pub fn subject(n: usize) -> String {
    format!("https://example.org/item/{}", n)
}

/// `ListIdentifiers` page; `token` is the resumption token for the next page
pub fn list_page(ids: &[String], token: Option<&str>) -> String {
    let headers: String = ids
        .iter()
        .map(|id| format!("<header><identifier>{}</identifier><datestamp>2024-01-01</datestamp></header>", id))
        .collect();
    let token = match token {
        Some(t) => format!("<resumptionToken cursor=\"0\">{}</resumptionToken>", t),
        None => String::new(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-05-01T10:00:00Z</responseDate>
  <ListIdentifiers>{}{}</ListIdentifiers>
</OAI-PMH>"#,
        headers, token
    )
}

/// `GetRecord` response carrying one `dc:title` triple about `subject(n)`
pub fn record(n: usize) -> String {
    record_with_metadata(
        n,
        &format!(
            r#"<rdf:RDF><rdf:Description rdf:about="{}"><dc:title>Title {}</dc:title></rdf:Description></rdf:RDF>"#,
            subject(n),
            n
        ),
    )
}

pub fn record_with_metadata(n: usize, metadata: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"
         xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <GetRecord>
    <record>
      <header><identifier>{}</identifier></header>
      <metadata>{}</metadata>
    </record>
  </GetRecord>
</OAI-PMH>"#,
        identifier(n),
        metadata
    )
}

pub fn oai_error(code: &str, message: &str) -> String {
    format!(
        r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"><error code="{}">{}</error></OAI-PMH>"#,
        code, message
    )
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/xml")
}

/// Serve a single-page listing of records `1..=count`
pub async fn mount_listing(server: &MockServer, count: usize) {
    let ids: Vec<_> = (1..=count).map(identifier).collect();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListIdentifiers"))
        .and(query_param("metadataPrefix", PREFIX))
        .respond_with(xml(list_page(&ids, None)))
        .mount(server)
        .await;
}

pub async fn mount_record_body(server: &MockServer, n: usize, body: String) {
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "GetRecord"))
        .and(query_param("identifier", identifier(n).as_str()))
        .respond_with(xml(body))
        .mount(server)
        .await;
}

/// Serve well-formed records `1..=count`
pub async fn mount_records(server: &MockServer, count: usize) {
    for n in 1..=count {
        mount_record_body(server, n, record(n)).await;
    }
}

pub async fn mount_get_record_error(server: &MockServer, code: &str) {
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "GetRecord"))
        .respond_with(xml(oai_error(code, "No matching identifier")))
        .mount(server)
        .await;
}

// ============================================================================
// Job wiring
// ============================================================================

pub fn endpoint(server: &MockServer) -> String {
    format!("{}/oai", server.uri())
}

pub fn harvest_config(server: &MockServer, spool_dir: &Path) -> HarvestConfig {
    let source = format!("{}#{}", endpoint(server), PREFIX).parse().unwrap();
    let sparql = SparqlConfig::new(Url::parse("http://triplestore.invalid/sparql").unwrap());
    let mut config = HarvestConfig::new(source, sparql);
    config.timeout = Duration::from_secs(10);
    config.spool_dir = spool_dir.to_path_buf();
    config
}

/// One N-Triples line per batch for the fixture records
pub const ONE_TRIPLE_PER_BATCH: u64 = 100;

pub fn policy(retries: u32, continue_on_failure: bool) -> SyncPolicy {
    SyncPolicy {
        retries,
        continue_on_failure,
        batch_bytes: ONE_TRIPLE_PER_BATCH,
    }
}

pub fn job(
    config: HarvestConfig,
    store: MemoryStore,
    policy: SyncPolicy,
) -> HarvestJob<OaiPmhClient, MemoryStore> {
    let source = OaiPmhClient::new(config.source.clone(), config.timeout)
        .unwrap()
        .with_max_response_bytes(config.max_response_bytes);
    HarvestJob::new(config, source, TriplestoreSync::new(store, policy))
}

// ============================================================================
// In-memory triplestore
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    graphs: HashMap<String, BTreeSet<String>>,
    /// Every update received, in order, failed ones included
    log: Vec<(UpdateKind, String)>,
    /// Distinct insert payloads in order of first arrival
    batches: Vec<String>,
    /// Batch number (1-based) → remaining failures
    insert_failures: HashMap<usize, u32>,
    delete_failures: u32,
}

/// Applies `DELETE WHERE` / `INSERT DATA` to sets of N-Triples lines
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt at insert batch `batch` fails
    pub fn failing_batch(self, batch: usize) -> Self {
        self.failing_batch_times(batch, u32::MAX)
    }

    /// The first `times` attempts at insert batch `batch` fail
    pub fn failing_batch_times(self, batch: usize, times: u32) -> Self {
        self.state.lock().unwrap().insert_failures.insert(batch, times);
        self
    }

    /// The first `times` deletes fail
    pub fn failing_deletes(self, times: u32) -> Self {
        self.state.lock().unwrap().delete_failures = times;
        self
    }

    pub fn with_triples(self, graph: &str, lines: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .graphs
            .entry(graph.to_string())
            .or_default()
            .extend(lines.iter().map(|l| l.to_string()));
        self
    }

    pub fn triples(&self, graph: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .graphs
            .get(graph)
            .cloned()
            .unwrap_or_default()
    }

    pub fn updates(&self) -> Vec<UpdateKind> {
        self.state.lock().unwrap().log.iter().map(|(k, _)| *k).collect()
    }

    /// Attempts made for insert batch `batch`
    pub fn attempts_for_batch(&self, batch: usize) -> usize {
        let state = self.state.lock().unwrap();
        let Some(payload) = state.batches.get(batch - 1) else {
            return 0;
        };
        state.log.iter().filter(|(_, text)| text == payload).count()
    }

    pub fn batch_count(&self) -> usize {
        self.state.lock().unwrap().batches.len()
    }
}

fn payload(text: &str) -> &str {
    let start = text.find(" {\n").map(|i| i + 3).unwrap_or(text.len());
    let end = text.rfind("} }").unwrap_or(text.len());
    &text[start..end.max(start)]
}

#[async_trait]
impl SparqlUpdate for MemoryStore {
    async fn update(&self, query: &UpdateQuery) -> Result<(), SparqlError> {
        let mut state = self.state.lock().unwrap();
        let text = query.as_str().to_string();
        state.log.push((query.kind(), text.clone()));
        let graph = query.graph().as_str().to_string();

        match query.kind() {
            UpdateKind::DeleteGraph => {
                if state.delete_failures > 0 {
                    state.delete_failures -= 1;
                    return Err(SparqlError::status(StatusCode::INTERNAL_SERVER_ERROR, "delete refused"));
                }
                state.graphs.remove(&graph);
            }
            UpdateKind::InsertData => {
                let batch = match state.batches.iter().position(|b| b == &text) {
                    Some(i) => i + 1,
                    None => {
                        state.batches.push(text.clone());
                        state.batches.len()
                    }
                };
                if let Some(left) = state.insert_failures.get_mut(&batch) {
                    if *left > 0 {
                        *left = left.saturating_sub(1);
                        return Err(SparqlError::status(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Virtuoso 37000 Error SP030: SPARQL compiler",
                        ));
                    }
                }
                let lines: Vec<String> = payload(&text).lines().map(|l| format!("{}\n", l)).collect();
                state.graphs.entry(graph).or_default().extend(lines);
            }
        }
        Ok(())
    }
}
