//! Harvest job: OAI-PMH records into one named graph
//!
//! ```text
//! Idle → Listing → (Fetching → Extracting)* → Replacing → Draining → Done
//!                                 any state → Aborted
//! ```
//!
//! Records are harvested one at a time into the spool. The triplestore is
//! only touched once harvesting is over, and only if at least one record
//! was harvested.

use crate::config::HarvestConfig;
use crate::error::{JobError, OaiPmhError, RecordError};
use crate::oaipmh::{MetadataSource, OaiPmhClient};
use crate::progress::Progress;
use crate::rdf::{RdfExtractor, TripleLine};
use crate::sparql::{SparqlClient, SparqlUpdate, SyncPolicy, SyncReport, TriplestoreSync};
use crate::spool::SpoolQueue;
use dha_common::units::format_bytes;
use std::fmt;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Listing,
    Fetching,
    Extracting,
    Replacing,
    Draining,
    Done,
    Aborted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listing => "listing",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Replacing => "replacing",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How a finished run went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Finished, but some records or batches were skipped
    PartialSuccess,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::PartialSuccess => f.write_str("partial success"),
        }
    }
}

/// Counters of a finished harvest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub records_listed: usize,
    pub records_harvested: usize,
    pub records_failed: usize,
    /// Headers flagged as deleted by the endpoint
    pub records_deleted: usize,
    pub triples_spooled: u64,
    pub bytes_spooled: u64,
    pub sync: SyncReport,
}

impl JobReport {
    pub fn outcome(&self) -> JobOutcome {
        if self.records_failed == 0 && self.sync.is_complete() {
            JobOutcome::Success
        } else {
            JobOutcome::PartialSuccess
        }
    }
}

/// One synchronisation run of an OAI-PMH endpoint into its named graph
pub struct HarvestJob<S, E> {
    config: HarvestConfig,
    source: S,
    sync: TriplestoreSync<E>,
    extractor: RdfExtractor,
    state: JobState,
}

impl HarvestJob<OaiPmhClient, SparqlClient> {
    /// Job talking to the endpoints named in `config`
    pub fn from_config(config: HarvestConfig) -> Result<Self, JobError> {
        config.validate()?;
        let source = OaiPmhClient::new(config.source.clone(), config.timeout)
            .map_err(JobError::Http)?
            .with_max_response_bytes(config.max_response_bytes);
        let endpoint = SparqlClient::new(&config.sparql).map_err(JobError::Http)?;
        let sync = TriplestoreSync::new(endpoint, SyncPolicy::from(&config.sparql));
        Ok(Self::new(config, source, sync))
    }
}

impl<S: MetadataSource, E: SparqlUpdate> HarvestJob<S, E> {
    pub fn new(config: HarvestConfig, source: S, sync: TriplestoreSync<E>) -> Self {
        let extractor = RdfExtractor::with_base_iri(config.source.endpoint().as_str());
        Self {
            config,
            source,
            sync,
            extractor,
            state: JobState::Idle,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn sync(&self) -> &TriplestoreSync<E> {
        &self.sync
    }

    /// Run the job to completion
    pub async fn run(&mut self) -> Result<JobReport, JobError> {
        match self.execute().await {
            Ok(report) => {
                self.transition(JobState::Done);
                info!(
                    outcome = %report.outcome(),
                    harvested = report.records_harvested,
                    failed = report.records_failed,
                    batches_skipped = report.sync.batches_skipped,
                    "Harvest finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.transition(JobState::Aborted);
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<JobReport, JobError> {
        let graph = self.config.graph_iri()?;
        let mut report = JobReport::default();

        let identifiers = match self.config.record_id.clone() {
            Some(id) => {
                info!(identifier = %id, "Harvesting a single record");
                vec![id]
            }
            None => self.list(&mut report).await?,
        };
        report.records_listed = identifiers.len() + report.records_failed;

        let mut spool = SpoolQueue::create_in(&self.config.spool_dir)?;
        let total = identifiers.len();
        let progress = Progress::start(total as u64);

        for (index, identifier) in identifiers.iter().enumerate() {
            info!(
                "Processing record {}/{} ({})",
                index + 1,
                total,
                progress.snapshot(index as u64)
            );
            match self.harvest_record(identifier).await {
                Ok(lines) => {
                    spool.append(&lines)?;
                    report.records_harvested += 1;
                    report.triples_spooled += lines.len() as u64;
                    report.bytes_spooled += lines.iter().map(|l| l.len() as u64).sum::<u64>();
                }
                Err(e) => {
                    report.records_failed += 1;
                    record_failed(identifier, &e);
                }
            }
        }

        if report.records_harvested == 0 {
            return Err(JobError::NothingHarvested {
                attempted: report.records_listed,
            });
        }
        info!(
            records = report.records_harvested,
            triples = report.triples_spooled,
            size = %format_bytes(report.bytes_spooled),
            "Harvesting finished"
        );

        self.transition(JobState::Replacing);
        self.sync
            .replace_graph(&graph)
            .await
            .map_err(|source| JobError::ReplaceGraph {
                graph: graph.as_str().to_string(),
                source,
            })?;

        self.transition(JobState::Draining);
        report.sync = self.sync.drain(&graph, spool).await?;
        Ok(report)
    }

    /// Identifiers of the live records, in listing order
    async fn list(&mut self, report: &mut JobReport) -> Result<Vec<String>, JobError> {
        self.transition(JobState::Listing);
        let headers = self.source.list_identifiers().await.map_err(|e| {
            error!(error = %e, "Listing identifiers failed");
            if let Some(body) = e.body() {
                debug!(body = %body, "Listing response");
            }
            JobError::Listing(e)
        })?;
        if headers.is_empty() {
            return Err(JobError::NoRecords);
        }

        let mut identifiers = Vec::with_capacity(headers.len());
        for (position, header) in headers.into_iter().enumerate() {
            match header.identifier {
                Some(_) if header.deleted => {
                    report.records_deleted += 1;
                    debug!(identifier = ?header.identifier, "Skipping deleted record");
                }
                Some(identifier) => identifiers.push(identifier),
                None => {
                    report.records_failed += 1;
                    let err = RecordError::from(OaiPmhError::malformed(
                        format!("#{}", position + 1),
                        "header without identifier",
                    ));
                    record_failed(&format!("#{}", position + 1), &err);
                }
            }
        }
        info!(
            records = identifiers.len(),
            deleted = report.records_deleted,
            "Listed identifiers"
        );
        Ok(identifiers)
    }

    async fn harvest_record(&mut self, identifier: &str) -> Result<Vec<TripleLine>, RecordError> {
        self.transition(JobState::Fetching);
        let payload = self.source.get_record(identifier).await?;

        self.transition(JobState::Extracting);
        let lines = self.extractor.extract(&payload.rdf_xml)?;
        debug!(identifier, triples = lines.len(), "Record extracted");
        Ok(lines)
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Job state change");
            self.state = next;
        }
    }
}

fn record_failed(identifier: &str, err: &RecordError) {
    error!(identifier, kind = err.kind(), error = %err, "Skipping record");
    if let Some(payload) = err.payload() {
        debug!(identifier, payload = %payload, "Offending payload");
    }
}
