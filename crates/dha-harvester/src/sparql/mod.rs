//! Triplestore access over the SPARQL 1.1 protocol
//!
//! - `query`: builds SELECT and UPDATE bodies from typed values
//! - `client`: HTTP transport (form-encoded POST, optional basic auth)
//! - `sync`: graph replacement and batched, retried inserts

pub mod client;
pub mod query;
pub mod sync;

pub use client::{SparqlClient, SparqlUpdate};
pub use query::{GraphIri, SelectQuery, UpdateKind, UpdateQuery};
pub use sync::{SyncPolicy, SyncReport, TriplestoreSync};
