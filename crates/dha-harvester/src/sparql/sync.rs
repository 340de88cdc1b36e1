//! Named graph synchronisation
//!
//! [`TriplestoreSync`] owns the write side of a job: clearing the target
//! graph and pushing spooled triples into it batch by batch. Every update
//! is tried `retries + 1` times with the identical payload before it counts
//! as failed. What happens after that depends on [`SyncPolicy`].

use crate::config::SparqlConfig;
use crate::error::{JobError, SparqlError, SyncFailure};
use crate::progress::Progress;
use crate::sparql::client::SparqlUpdate;
use crate::sparql::query::{GraphIri, UpdateQuery};
use crate::spool::{SpoolQueue, SyncBatch};
use dha_common::units::format_bytes;
use tracing::{debug, error, info, warn};

/// Failure handling for triplestore writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Extra attempts after the first failed one
    pub retries: u32,
    /// Skip a batch that keeps failing instead of aborting
    pub continue_on_failure: bool,
    /// Byte budget of one INSERT DATA payload
    pub batch_bytes: u64,
}

impl SyncPolicy {
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl From<&SparqlConfig> for SyncPolicy {
    fn from(config: &SparqlConfig) -> Self {
        Self {
            retries: config.retries,
            continue_on_failure: config.continue_on_failure,
            batch_bytes: config.batch_bytes,
        }
    }
}

/// Outcome of draining a spool into the triplestore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches_committed: usize,
    pub batches_skipped: usize,
    pub triples_committed: u64,
    pub triples_skipped: u64,
    pub bytes_committed: u64,
    pub bytes_skipped: u64,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.batches_skipped == 0
    }
}

/// Writes triples into one named graph through a [`SparqlUpdate`] endpoint
#[derive(Debug, Clone)]
pub struct TriplestoreSync<E> {
    endpoint: E,
    policy: SyncPolicy,
}

impl<E: SparqlUpdate> TriplestoreSync<E> {
    pub fn new(endpoint: E, policy: SyncPolicy) -> Self {
        Self { endpoint, policy }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Remove every triple from `graph`
    ///
    /// Idempotent: clearing an empty graph succeeds and changes nothing.
    pub async fn replace_graph(&self, graph: &GraphIri) -> Result<(), SyncFailure> {
        info!(graph = %graph.as_str(), "Clearing named graph");
        self.execute(&UpdateQuery::delete_graph(graph)).await
    }

    /// Insert one batch of N-Triples lines into `graph`
    pub async fn insert_batch(&self, graph: &GraphIri, batch: &SyncBatch) -> Result<(), SyncFailure> {
        self.execute(&UpdateQuery::insert_data(graph, batch)).await
    }

    /// Send every batch of the spool to `graph`
    ///
    /// A batch that fails after all attempts is either skipped (continue on
    /// failure) or ends the import. In the latter case the graph is cleared
    /// once more, best effort, so it is left empty rather than half filled.
    pub async fn drain(&self, graph: &GraphIri, spool: SpoolQueue) -> Result<SyncReport, JobError> {
        let total = spool.total_len();
        let batches = spool.drain(self.policy.batch_bytes)?;
        let progress = Progress::start(total);
        let mut report = SyncReport::default();
        let mut sent: u64 = 0;
        let mut index = 0usize;

        info!(
            graph = %graph.as_str(),
            size = %format_bytes(total),
            budget = %format_bytes(self.policy.batch_bytes),
            "Sending triples to the triplestore"
        );

        for batch in batches {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Reading the spool file failed");
                    self.cleanup(graph).await;
                    return Err(JobError::Spool(e));
                }
            };
            index += 1;

            match self.insert_batch(graph, &batch).await {
                Ok(()) => {
                    report.batches_committed += 1;
                    report.triples_committed += batch.line_count() as u64;
                    report.bytes_committed += batch.len() as u64;
                }
                Err(failure) if self.policy.continue_on_failure => {
                    warn!(
                        batch = index,
                        triples = batch.line_count(),
                        error = %failure,
                        "Skipping batch, its triples are not imported"
                    );
                    report.batches_skipped += 1;
                    report.triples_skipped += batch.line_count() as u64;
                    report.bytes_skipped += batch.len() as u64;
                }
                Err(failure) => {
                    error!(batch = index, error = %failure, "Aborting import");
                    let cleanup_succeeded = self.cleanup(graph).await;
                    return Err(JobError::SyncAborted {
                        batch: index,
                        cleanup_succeeded,
                        source: failure,
                    });
                }
            }

            sent += batch.len() as u64;
            info!("Sending triples batch ({})", progress.snapshot(sent));
        }

        info!(
            committed = report.batches_committed,
            skipped = report.batches_skipped,
            triples = report.triples_committed,
            "Triplestore import finished"
        );
        Ok(report)
    }

    /// Single, unretried clear after an aborted import
    async fn cleanup(&self, graph: &GraphIri) -> bool {
        warn!(graph = %graph.as_str(), "Clearing partially imported graph");
        match self.endpoint.update(&UpdateQuery::delete_graph(graph)).await {
            Ok(()) => true,
            Err(e) => {
                error!(graph = %graph.as_str(), error = %e, "Cleanup failed, graph may be partially populated");
                false
            }
        }
    }

    async fn execute(&self, query: &UpdateQuery) -> Result<(), SyncFailure> {
        let attempts = self.policy.attempts();
        let mut last_error: Option<SparqlError> = None;

        for attempt in 1..=attempts {
            match self.endpoint.update(query).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(attempt, "Update succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    match &e {
                        SparqlError::Status { status, body } => error!(
                            attempt,
                            attempts,
                            status = %status,
                            body = %body,
                            "SPARQL update attempt {}/{} failed",
                            attempt,
                            attempts
                        ),
                        other => error!(
                            attempt,
                            attempts,
                            error = %other,
                            "SPARQL update attempt {}/{} failed",
                            attempt,
                            attempts
                        ),
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(SyncFailure {
            attempts,
            source: last_error.unwrap_or_else(|| {
                SparqlError::InvalidResponse("update was never attempted".to_string())
            }),
        })
    }
}
