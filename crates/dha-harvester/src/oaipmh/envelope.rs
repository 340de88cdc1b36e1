//! OAI-PMH response envelopes
//!
//! `ListIdentifiers` pages are small and flat, so they are deserialized with
//! `quick_xml::de` into plain structs. `GetRecord` responses carry an
//! arbitrary RDF/XML document that has to be cut out verbatim, so they are
//! walked event by event with a namespace-aware reader instead.

use crate::error::{excerpt, OaiPmhError, OaiResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Writer};
use serde::Deserialize;
use std::collections::BTreeMap;

/// OAI-PMH 2.0 namespace
pub const OAI_NAMESPACE: &str = "http://www.openarchives.org/OAI/2.0/";

/// RDF syntax namespace
pub const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// Error code an endpoint uses for an empty result
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Header of one record in a `ListIdentifiers` page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub identifier: Option<String>,
    pub deleted: bool,
}

/// One page of a `ListIdentifiers` listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListIdentifiersPage {
    pub headers: Vec<RecordHeader>,
    /// Token for the next page; `None` on the last page
    pub resumption_token: Option<String>,
}

/// The RDF/XML document of one record, standalone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdfPayload {
    pub identifier: String,
    pub rdf_xml: String,
}

// ============================================================================
// ListIdentifiers
// ============================================================================

#[derive(Debug, Deserialize)]
struct OaiPmhDocument {
    #[serde(rename = "error", default)]
    errors: Vec<ErrorElement>,
    #[serde(rename = "ListIdentifiers")]
    list_identifiers: Option<ListIdentifiersElement>,
}

#[derive(Debug, Deserialize)]
struct ErrorElement {
    #[serde(rename = "@code", default)]
    code: String,
    #[serde(rename = "$text", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListIdentifiersElement {
    #[serde(rename = "header", default)]
    headers: Vec<HeaderElement>,
    #[serde(rename = "resumptionToken")]
    resumption_token: Option<ResumptionTokenElement>,
}

#[derive(Debug, Deserialize)]
struct HeaderElement {
    #[serde(rename = "@status")]
    status: Option<String>,
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResumptionTokenElement {
    #[serde(rename = "$text", default)]
    token: String,
}

/// Decode one `ListIdentifiers` response page
///
/// `noRecordsMatch` is an empty page, any other `<error>` is a protocol
/// error.
pub fn parse_list_identifiers(body: &[u8]) -> OaiResult<ListIdentifiersPage> {
    let text = std::str::from_utf8(body)
        .map_err(|e| OaiPmhError::protocol(format!("response is not UTF-8: {}", e), lossy(body)))?;
    let document: OaiPmhDocument = quick_xml::de::from_str(text)
        .map_err(|e| OaiPmhError::protocol(format!("invalid ListIdentifiers response: {}", e), lossy(body)))?;

    if !document.errors.is_empty() {
        if document.errors.iter().all(|e| e.code == NO_RECORDS_MATCH) {
            return Ok(ListIdentifiersPage::default());
        }
        return Err(endpoint_error(
            document.errors.iter().map(|e| (e.code.as_str(), e.message.as_str())),
            body,
        ));
    }

    let list = document.list_identifiers.ok_or_else(|| {
        OaiPmhError::protocol("response has neither ListIdentifiers nor error", lossy(body))
    })?;

    let headers = list
        .headers
        .into_iter()
        .map(|h| RecordHeader {
            identifier: h
                .identifier
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            deleted: h.status.as_deref() == Some("deleted"),
        })
        .collect();
    let resumption_token = list
        .resumption_token
        .map(|t| t.token.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(ListIdentifiersPage {
        headers,
        resumption_token,
    })
}

// ============================================================================
// GetRecord
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    Oai,
    Rdf,
    Other,
}

#[derive(Debug)]
struct Step {
    ns: Ns,
    local: String,
}

impl Step {
    fn new(ns: &ResolveResult<'_>, local: &[u8]) -> Self {
        let ns = match ns {
            ResolveResult::Bound(ns) if ns.as_ref() == OAI_NAMESPACE.as_bytes() => Ns::Oai,
            ResolveResult::Bound(ns) if ns.as_ref() == RDF_NAMESPACE.as_bytes() => Ns::Rdf,
            _ => Ns::Other,
        };
        Self {
            ns,
            local: String::from_utf8_lossy(local).into_owned(),
        }
    }
}

const ROOT: &[(Ns, &str)] = &[(Ns::Oai, "OAI-PMH")];
const ERROR: &[(Ns, &str)] = &[(Ns::Oai, "OAI-PMH"), (Ns::Oai, "error")];
const RECORD_HEADER: &[(Ns, &str)] = &[
    (Ns::Oai, "OAI-PMH"),
    (Ns::Oai, "GetRecord"),
    (Ns::Oai, "record"),
    (Ns::Oai, "header"),
];
const RECORD_RDF: &[(Ns, &str)] = &[
    (Ns::Oai, "OAI-PMH"),
    (Ns::Oai, "GetRecord"),
    (Ns::Oai, "record"),
    (Ns::Oai, "metadata"),
    (Ns::Rdf, "RDF"),
];

/// Element path plus the `xmlns` declarations made on each element
#[derive(Debug, Default)]
struct Scope {
    path: Vec<Step>,
    declarations: Vec<Vec<(String, String)>>,
}

impl Scope {
    fn at(&self, pattern: &[(Ns, &str)]) -> bool {
        self.path.len() == pattern.len()
            && self
                .path
                .iter()
                .zip(pattern)
                .all(|(step, (ns, local))| step.ns == *ns && step.local == *local)
    }

    /// Whether a child `step` of the current element would sit at `pattern`
    fn child_at(&self, step: &Step, pattern: &[(Ns, &str)]) -> bool {
        match pattern.split_last() {
            Some(((ns, local), parent)) => {
                step.ns == *ns && step.local == *local && self.at(parent)
            }
            None => false,
        }
    }

    fn enter(&mut self, step: Step, declarations: Vec<(String, String)>) {
        self.path.push(step);
        self.declarations.push(declarations);
    }

    fn leave(&mut self) {
        self.path.pop();
        self.declarations.pop();
    }

    /// Bindings in scope for the current element's children
    fn in_scope(&self) -> BTreeMap<&str, &str> {
        self.declarations
            .iter()
            .flatten()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }
}

/// Extract the `rdf:RDF` document of a `GetRecord` response
///
/// Namespace declarations inherited from the envelope are re-declared on the
/// extracted root so the fragment parses on its own.
pub fn parse_get_record(body: &[u8], identifier: &str) -> OaiResult<RdfPayload> {
    let mut reader = NsReader::from_reader(body);
    let mut scope = Scope::default();
    let mut pending_leave = false;
    let mut seen_root = false;

    let mut errors: Vec<(String, String)> = Vec::new();
    let mut error_text: Option<(String, String)> = None;
    let mut deleted = false;

    let mut capture: Option<Writer<Vec<u8>>> = None;
    let mut rdf_xml: Option<Vec<u8>> = None;

    loop {
        if pending_leave {
            scope.leave();
            pending_leave = false;
        }

        let (ns, event) = reader
            .read_resolved_event()
            .map_err(|e| OaiPmhError::protocol(format!("invalid GetRecord response: {}", e), lossy(body)))?;

        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let step = Step::new(&ns, e.local_name().as_ref());
                if scope.path.is_empty() {
                    if seen_root || !scope.child_at(&step, ROOT) {
                        return Err(OaiPmhError::protocol(
                            format!("unexpected root element <{}>", step.local),
                            lossy(body),
                        ));
                    }
                    seen_root = true;
                }

                let declared = namespace_declarations(e, body)?;
                let empty = matches!(event, Event::Empty(_));
                let starts_capture =
                    capture.is_none() && rdf_xml.is_none() && scope.child_at(&step, RECORD_RDF);

                if starts_capture {
                    let root = redeclare(e, &scope.in_scope(), &declared);
                    let mut writer = Writer::new(Vec::new());
                    let root_event = if empty { Event::Empty(root) } else { Event::Start(root) };
                    write(&mut writer, root_event)?;
                    if empty {
                        rdf_xml = Some(writer.into_inner());
                    } else {
                        capture = Some(writer);
                    }
                } else if let Some(writer) = capture.as_mut() {
                    write(writer, event.clone())?;
                }
                scope.enter(step, declared);

                if scope.at(ERROR) {
                    let code = attribute(e, "code", body)?.unwrap_or_default();
                    if empty {
                        errors.push((code, String::new()));
                    } else {
                        error_text = Some((code, String::new()));
                    }
                } else if scope.at(RECORD_HEADER) {
                    deleted = attribute(e, "status", body)?.as_deref() == Some("deleted");
                }

                if empty {
                    pending_leave = true;
                }
            }
            Event::End(_) => {
                if scope.at(RECORD_RDF) {
                    if let Some(mut writer) = capture.take() {
                        write(&mut writer, event.clone())?;
                        rdf_xml = Some(writer.into_inner());
                    }
                } else if let Some(writer) = capture.as_mut() {
                    write(writer, event.clone())?;
                } else if scope.at(ERROR) {
                    errors.extend(error_text.take());
                }
                pending_leave = true;
            }
            Event::Text(t) => {
                if let Some(writer) = capture.as_mut() {
                    write(writer, event.clone())?;
                } else if let Some((_, message)) = error_text.as_mut() {
                    let text = t.unescape().map_err(|e| {
                        OaiPmhError::protocol(format!("invalid error text: {}", e), lossy(body))
                    })?;
                    message.push_str(&text);
                }
            }
            Event::CData(_) | Event::Comment(_) | Event::PI(_) => {
                if let Some(writer) = capture.as_mut() {
                    write(writer, event.clone())?;
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::DocType(_) => {}
        }
    }

    if !scope.path.is_empty() {
        return Err(OaiPmhError::protocol("response ends before the envelope is closed", lossy(body)));
    }
    if !seen_root {
        return Err(OaiPmhError::protocol("empty response", lossy(body)));
    }
    if !errors.is_empty() {
        return Err(endpoint_error(
            errors.iter().map(|(code, message)| (code.as_str(), message.as_str())),
            body,
        ));
    }

    let rdf_xml = rdf_xml.ok_or_else(|| {
        let reason = if deleted {
            "record is marked as deleted and carries no rdf:RDF"
        } else {
            "no rdf:RDF element under GetRecord/record/metadata"
        };
        OaiPmhError::malformed(identifier, reason)
    })?;

    let rdf_xml = String::from_utf8(rdf_xml)
        .map_err(|e| OaiPmhError::malformed(identifier, format!("rdf:RDF is not UTF-8: {}", e)))?;

    Ok(RdfPayload {
        identifier: identifier.to_string(),
        rdf_xml,
    })
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> OaiResult<()> {
    writer
        .write_event(event)
        .map_err(|e| OaiPmhError::protocol(format!("buffering rdf:RDF failed: {}", e), String::new()))
}

/// `xmlns` / `xmlns:prefix` attributes of an element, values unescaped
fn namespace_declarations(element: &BytesStart<'_>, body: &[u8]) -> OaiResult<Vec<(String, String)>> {
    let mut declarations = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| OaiPmhError::protocol(format!("invalid attribute: {}", e), lossy(body)))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            let value = attr
                .unescape_value()
                .map_err(|e| OaiPmhError::protocol(format!("invalid attribute: {}", e), lossy(body)))?;
            declarations.push((String::from_utf8_lossy(key).into_owned(), value.into_owned()));
        }
    }
    Ok(declarations)
}

fn attribute(element: &BytesStart<'_>, name: &str, body: &[u8]) -> OaiResult<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| OaiPmhError::protocol(format!("invalid attribute: {}", e), lossy(body)))?;
    attr.map(|a| {
        a.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|e| OaiPmhError::protocol(format!("invalid attribute: {}", e), lossy(body)))
    })
    .transpose()
}

/// Copy of `element` carrying every inherited binding it does not declare
fn redeclare(
    element: &BytesStart<'_>,
    inherited: &BTreeMap<&str, &str>,
    declared: &[(String, String)],
) -> BytesStart<'static> {
    let mut root = element.to_owned();
    for (key, value) in inherited {
        if !declared.iter().any(|(k, _)| k == key) {
            root.push_attribute((*key, *value));
        }
    }
    root
}

fn endpoint_error<'a>(errors: impl Iterator<Item = (&'a str, &'a str)>, body: &[u8]) -> OaiPmhError {
    let message = errors
        .map(|(code, message)| format!("{}: {}", code, message.trim()))
        .collect::<Vec<_>>()
        .join("; ");
    OaiPmhError::protocol(format!("endpoint returned error {}", message), lossy(body))
}

fn lossy(body: &[u8]) -> String {
    excerpt(&String::from_utf8_lossy(body))
}
