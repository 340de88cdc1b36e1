//! SPARQL query construction
//!
//! Escaping rules:
//!
//! - Graph IRIs are validated with `oxrdf` before they can be used and are
//!   rendered as `<iri>`. A validated IRI cannot contain `<`, `>`, `"`,
//!   `{`, `}`, `|`, `^`, `` ` ``, `\` or whitespace, so it cannot escape the
//!   IRI token.
//! - Triple payloads are N-Triples lines produced by [`crate::rdf`]. Their
//!   terms are already escaped by the N-Triples writer, and N-Triples term
//!   syntax is a subset of the SPARQL triple template syntax, so lines are
//!   pasted verbatim inside `GRAPH <g> { ... }`.
//! - String values (the concept namespace) go through `oxrdf::Literal`
//!   and are rendered as escaped string literals.

use crate::spool::SyncBatch;
use dha_common::{DhaError, Result};
use oxrdf::{Literal, NamedNode};
use std::fmt;

/// IRI of a named graph, validated on construction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphIri(NamedNode);

impl GraphIri {
    pub fn parse(iri: &str) -> Result<Self> {
        NamedNode::new(iri)
            .map(Self)
            .map_err(|e| DhaError::invalid_iri(iri, e))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Renders as an IRI token: `<http://example.org/graph>`
impl fmt::Display for GraphIri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Remove every triple of one graph
    DeleteGraph,
    /// Add a batch of triples to one graph
    InsertData,
}

/// A SPARQL UPDATE request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateQuery {
    kind: UpdateKind,
    graph: GraphIri,
    text: String,
}

impl UpdateQuery {
    /// `DELETE WHERE` scoped to one graph; a no-op on an empty graph
    pub fn delete_graph(graph: &GraphIri) -> Self {
        Self {
            kind: UpdateKind::DeleteGraph,
            graph: graph.clone(),
            text: format!("DELETE WHERE {{ GRAPH {} {{ ?s ?p ?o }} }}", graph),
        }
    }

    /// `INSERT DATA` of a batch of N-Triples lines into one graph
    pub fn insert_data(graph: &GraphIri, batch: &SyncBatch) -> Self {
        let payload = batch.as_str();
        let mut text = String::with_capacity(payload.len() + graph.as_str().len() + 32);
        text.push_str("INSERT DATA { GRAPH ");
        text.push_str(&graph.to_string());
        text.push_str(" {\n");
        text.push_str(payload);
        if !payload.is_empty() && !payload.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("} }");

        Self {
            kind: UpdateKind::InsertData,
            graph: graph.clone(),
            text,
        }
    }

    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    pub fn graph(&self) -> &GraphIri {
        &self.graph
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// A SPARQL SELECT request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery(String);

impl SelectQuery {
    /// Distinct `(?g, ?o)` pairs where `?o` starts with `namespace`
    ///
    /// With `graph` set, only that graph is searched.
    pub fn concepts_in_namespace(namespace: &str, graph: Option<&GraphIri>) -> Self {
        let from = graph
            .map(|g| format!(" FROM NAMED {}", g))
            .unwrap_or_default();
        let prefix = Literal::new_simple_literal(namespace);
        Self(format!(
            "SELECT DISTINCT ?g ?o{} WHERE {{ GRAPH ?g {{ ?s ?p ?o FILTER STRSTARTS(STR(?o), {}) }} }}",
            from, prefix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
