//! Vocabulary enrichment
//!
//! Finds object IRIs in the triplestore that belong to a concept namespace,
//! dereferences each of them as Turtle and adds the returned triples to
//! every graph that refers to the concept. Graphs are only ever added to,
//! never cleared.

use crate::config::VocabularyConfig;
use crate::error::{ConceptError, JobError};
use crate::job::JobOutcome;
use crate::rdf::{RdfExtractor, TripleLine};
use crate::sparql::client::Solution;
use crate::sparql::{GraphIri, SelectQuery, SparqlClient, SyncPolicy, TriplestoreSync};
use crate::spool::Batcher;
use dha_common::error::parse_http_url;
use oxrdfio::RdfFormat;
use reqwest::{header, Client};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Media type requested when dereferencing a concept
pub const TURTLE: &str = "text/turtle";

/// Counters of a finished enrichment run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VocabularyReport {
    pub concepts_found: usize,
    pub concepts_enriched: usize,
    pub concepts_failed: usize,
    pub triples_inserted: u64,
}

impl VocabularyReport {
    pub fn outcome(&self) -> JobOutcome {
        if self.concepts_failed == 0 {
            JobOutcome::Success
        } else {
            JobOutcome::PartialSuccess
        }
    }
}

/// Enriches graphs with the descriptions of the concepts they reference
pub struct VocabularyHarvester {
    config: VocabularyConfig,
    client: SparqlClient,
    sync: TriplestoreSync<SparqlClient>,
    fetcher: Client,
}

impl VocabularyHarvester {
    pub fn from_config(config: VocabularyConfig) -> Result<Self, JobError> {
        config.validate()?;
        let client = SparqlClient::new(&config.sparql).map_err(JobError::Http)?;
        let sync = TriplestoreSync::new(client.clone(), SyncPolicy::from(&config.sparql));
        let fetcher = Client::builder()
            .timeout(config.sparql.timeout)
            .user_agent(concat!("dha-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(JobError::Http)?;

        Ok(Self {
            config,
            client,
            sync,
            fetcher,
        })
    }

    pub async fn run(&self) -> Result<VocabularyReport, JobError> {
        let query =
            SelectQuery::concepts_in_namespace(&self.config.namespace, self.config.graph.as_ref());
        info!(namespace = %self.config.namespace, "Looking up referenced concepts");
        let rows = self.client.select(&query).await.map_err(JobError::Query)?;

        let concepts = group_by_concept(&rows);
        let mut report = VocabularyReport {
            concepts_found: concepts.len(),
            ..Default::default()
        };
        info!(concepts = concepts.len(), "Found referenced concepts");

        for (concept, graphs) in &concepts {
            match self.enrich(concept, graphs).await {
                Ok(inserted) => {
                    report.concepts_enriched += 1;
                    report.triples_inserted += inserted;
                }
                Err(e) => {
                    report.concepts_failed += 1;
                    warn!(concept = %concept, error = %e, "Skipping concept");
                }
            }
        }

        info!(
            outcome = %report.outcome(),
            enriched = report.concepts_enriched,
            failed = report.concepts_failed,
            triples = report.triples_inserted,
            "Vocabulary enrichment finished"
        );
        Ok(report)
    }

    /// Fetch one concept and insert it into each referencing graph
    async fn enrich(&self, concept: &str, graphs: &[GraphIri]) -> Result<u64, ConceptError> {
        let lines = self.fetch(concept).await?;
        debug!(concept, triples = lines.len(), graphs = graphs.len(), "Concept fetched");

        for graph in graphs {
            let mut batcher = Batcher::new(self.sync.policy().batch_bytes);
            for line in &lines {
                if let Some(batch) = batcher.push(line.as_str().to_string()) {
                    self.sync.insert_batch(graph, &batch).await?;
                }
            }
            if let Some(batch) = batcher.finish() {
                self.sync.insert_batch(graph, &batch).await?;
            }
        }
        Ok((lines.len() * graphs.len()) as u64)
    }

    async fn fetch(&self, concept: &str) -> Result<Vec<TripleLine>, ConceptError> {
        let url = parse_http_url(concept).map_err(ConceptError::InvalidUri)?;
        let response = self
            .fetcher
            .get(url)
            .header(header::ACCEPT, TURTLE)
            .send()
            .await
            .map_err(ConceptError::Fetch)?;
        if !response.status().is_success() {
            return Err(ConceptError::Status(response.status()));
        }
        let body = response.text().await.map_err(ConceptError::Fetch)?;

        let triples = RdfExtractor::with_base_iri(concept).parse_document(&body, RdfFormat::Turtle)?;
        Ok(triples.iter().map(TripleLine::from_triple).collect())
    }
}

/// Concept IRI → graphs referencing it, both deduplicated
fn group_by_concept(rows: &[Solution]) -> BTreeMap<String, Vec<GraphIri>> {
    let mut concepts: BTreeMap<String, Vec<GraphIri>> = BTreeMap::new();
    for row in rows {
        let (Some(graph), Some(object)) = (row.get("g"), row.get("o")) else {
            warn!(?row, "Result row without ?g or ?o");
            continue;
        };
        if object.kind != "uri" {
            debug!(value = %object.value, "Ignoring non-IRI value");
            continue;
        }
        let graph = match GraphIri::parse(&graph.value) {
            Ok(graph) => graph,
            Err(e) => {
                warn!(graph = %graph.value, error = %e, "Ignoring invalid graph IRI");
                continue;
            }
        };
        let graphs = concepts.entry(object.value.clone()).or_default();
        if !graphs.contains(&graph) {
            graphs.push(graph);
        }
    }
    concepts
}
