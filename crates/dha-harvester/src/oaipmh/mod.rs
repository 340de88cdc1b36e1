//! OAI-PMH metadata source
//!
//! Only the two verbs the harvest needs are implemented: `ListIdentifiers`
//! (with resumption tokens) and `GetRecord`.

pub mod client;
pub mod envelope;

pub use client::{MetadataSource, OaiPmhClient};
pub use envelope::{ListIdentifiersPage, RdfPayload, RecordHeader};
