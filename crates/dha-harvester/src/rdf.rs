//! RDF payload to N-Triples conversion
//!
//! Each record's `rdf:RDF` fragment is parsed on its own and flattened into
//! N-Triples lines. Blank node labels are renamed per document so that two
//! records using the same `rdf:nodeID` do not collapse into one node once
//! they share a graph.

use crate::error::RdfError;
use oxrdf::Triple;
use oxrdfio::{RdfFormat, RdfParser};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;

/// Longest payload excerpt kept inside a parse error
const FRAGMENT_EXCERPT_LEN: usize = 4096;

/// One triple serialised as a complete N-Triples statement, `\n` included
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TripleLine(String);

impl TripleLine {
    pub fn from_triple(triple: &Triple) -> Self {
        Self(format!("{} .\n", triple))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TripleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses RDF documents relative to an optional base IRI
#[derive(Debug, Clone, Default)]
pub struct RdfExtractor {
    base_iri: Option<String>,
}

impl RdfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative IRIs in documents against `base`
    pub fn with_base_iri(base: impl Into<String>) -> Self {
        Self {
            base_iri: Some(base.into()),
        }
    }

    /// Turn an RDF/XML document into N-Triples lines
    ///
    /// All-or-nothing: a document with a syntax error yields no lines.
    pub fn extract(&self, rdf_xml: &str) -> Result<Vec<TripleLine>, RdfError> {
        let triples = self.parse_document(rdf_xml, RdfFormat::RdfXml)?;
        Ok(triples.iter().map(TripleLine::from_triple).collect())
    }

    /// Parse a whole document of the given format into triples
    ///
    /// Quads of named graphs (TriG, N-Quads) are flattened into triples.
    pub fn parse_document(&self, data: &str, format: RdfFormat) -> Result<Vec<Triple>, RdfError> {
        if format == RdfFormat::RdfXml {
            check_well_formed(data)?;
        }

        let mut parser = RdfParser::from_format(format).rename_blank_nodes();
        if let Some(base) = &self.base_iri {
            parser = parser
                .with_base_iri(base.as_str())
                .map_err(|e| RdfError::InvalidIri {
                    iri: base.clone(),
                    reason: e.to_string(),
                })?;
        }

        let mut triples = Vec::new();
        for quad in parser.for_reader(data.as_bytes()) {
            let quad = quad.map_err(|e| RdfError::parse(e, fragment(data)))?;
            triples.push(Triple::new(quad.subject, quad.predicate, quad.object));
        }
        Ok(triples)
    }
}

/// Reject XML that is cut off or has mismatched tags
///
/// The RDF/XML parser emits triples as soon as an element is complete and
/// does not complain when the input stops with elements still open.
fn check_well_formed(data: &str) -> Result<(), RdfError> {
    let mut reader = Reader::from_str(data);
    let mut depth: usize = 0;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(RdfError::parse(e, fragment(data))),
        }
    }
    if depth > 0 {
        return Err(RdfError::parse(
            format!("document ends with {} unclosed element(s)", depth),
            fragment(data),
        ));
    }
    Ok(())
}

fn fragment(data: &str) -> String {
    if data.len() <= FRAGMENT_EXCERPT_LEN {
        return data.to_string();
    }
    let mut end = FRAGMENT_EXCERPT_LEN;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    data[..end].to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const RECORD: &str = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
        xmlns:dc="http://purl.org/dc/elements/1.1/">
      <rdf:Description rdf:about="https://example.org/item/1">
        <dc:title xml:lang="de">Wiener "Zeitung"</dc:title>
        <dc:subject rdf:resource="https://vocabs.example.org/concept/7"/>
        <dc:description>line one
line two</dc:description>
      </rdf:Description>
    </rdf:RDF>"#;

    #[test]
    fn test_extract_produces_statements() {
        let lines = RdfExtractor::new().extract(RECORD).unwrap();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert!(line.as_str().ends_with(" .\n"));
            assert_eq!(line.as_str().matches('\n').count(), 1);
        }
        assert!(lines.iter().any(|l| l
            .as_str()
            .contains(r#""Wiener \"Zeitung\""@de"#)));
    }

    #[test]
    fn test_lines_reparse_to_same_graph() {
        let extractor = RdfExtractor::new();
        let original: HashSet<Triple> = extractor
            .parse_document(RECORD, RdfFormat::RdfXml)
            .unwrap()
            .into_iter()
            .collect();

        let ntriples: String = extractor
            .extract(RECORD)
            .unwrap()
            .into_iter()
            .map(TripleLine::into_string)
            .collect();
        let reparsed: HashSet<Triple> = extractor
            .parse_document(&ntriples, RdfFormat::NTriples)
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_relative_iris_resolved_against_base() {
        let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
            xmlns:dc="http://purl.org/dc/elements/1.1/">
          <rdf:Description rdf:about="item/2"><dc:title>x</dc:title></rdf:Description>
        </rdf:RDF>"#;
        let lines = RdfExtractor::with_base_iri("https://example.org/oai")
            .extract(doc)
            .unwrap();
        assert!(lines[0].as_str().starts_with("<https://example.org/item/2>"));
    }

    #[test]
    fn test_blank_nodes_distinct_between_documents() {
        let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
            xmlns:dc="http://purl.org/dc/elements/1.1/">
          <rdf:Description rdf:nodeID="a"><dc:title>x</dc:title></rdf:Description>
        </rdf:RDF>"#;
        let extractor = RdfExtractor::new();
        let first = extractor.extract(doc).unwrap();
        let second = extractor.extract(doc).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_xml_is_all_or_nothing() {
        let broken = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
          <rdf:Description rdf:about="https://example.org/x">"#;
        let err = RdfExtractor::new().extract(broken).unwrap_err();
        match err {
            RdfError::Parse { fragment, .. } => assert!(fragment.contains("rdf:Description")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_document_yields_no_lines() {
        let truncated = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
            xmlns:dc="http://purl.org/dc/elements/1.1/">
          <rdf:Description rdf:about="https://example.org/x"><dc:title>a</dc:title>"#;
        let err = RdfExtractor::new().extract(truncated).unwrap_err();
        assert!(matches!(err, RdfError::Parse { .. }));
    }

    #[test]
    fn test_mismatched_end_tag_rejected() {
        let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
            xmlns:dc="http://purl.org/dc/elements/1.1/">
          <rdf:Description rdf:about="https://example.org/x"><dc:title>a</dc:creator>
          </rdf:Description>
        </rdf:RDF>"#;
        assert!(RdfExtractor::new().extract(doc).is_err());
    }

    #[test]
    fn test_invalid_base_rejected() {
        let err = RdfExtractor::with_base_iri("not a base")
            .extract(RECORD)
            .unwrap_err();
        assert!(matches!(err, RdfError::InvalidIri { .. }));
    }
}
