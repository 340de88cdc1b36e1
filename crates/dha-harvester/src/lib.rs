//! DHA harvester
//!
//! Keeps a named graph of a SPARQL triplestore in sync with the RDF metadata
//! published by an OAI-PMH endpoint.
//!
//! # Overview
//!
//! - **Harvesting**: list identifiers, fetch each record and extract its
//!   RDF/XML as N-Triples (`oaipmh`, `rdf`)
//! - **Spooling**: buffer triples on disk until harvesting is over (`spool`)
//! - **Synchronisation**: clear the graph, then insert size-bounded batches
//!   with bounded retries (`sparql`)
//! - **Vocabulary enrichment**: add the descriptions of referenced concepts
//!   to the graphs that use them (`vocabulary`)

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod oaipmh;
pub mod progress;
pub mod rdf;
pub mod sparql;
pub mod spool;
pub mod vocabulary;

pub use cli::{Cli, Command};
pub use config::{HarvestConfig, OaiPmhConnection, SparqlConfig, VocabularyConfig};
pub use error::{JobError, RecordError, SyncFailure};
pub use job::{HarvestJob, JobOutcome, JobReport, JobState};
pub use vocabulary::{VocabularyHarvester, VocabularyReport};
