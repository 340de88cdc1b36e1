//! HTTP client for an OAI-PMH endpoint

use crate::config::{OaiPmhConnection, DEFAULT_MAX_RESPONSE_SIZE_MIB};
use crate::error::{OaiPmhError, OaiResult};
use crate::oaipmh::envelope::{self, RdfPayload, RecordHeader};
use async_trait::async_trait;
use dha_common::units::{format_bytes, mib_to_bytes};
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where records come from
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Every record header of the configured set, across all pages
    async fn list_identifiers(&self) -> OaiResult<Vec<RecordHeader>>;

    /// The RDF/XML document of one record
    async fn get_record(&self, identifier: &str) -> OaiResult<RdfPayload>;
}

/// OAI-PMH client bound to one endpoint, metadata prefix and set
#[derive(Debug, Clone)]
pub struct OaiPmhClient {
    client: Client,
    connection: OaiPmhConnection,
    max_response_bytes: u64,
}

impl OaiPmhClient {
    pub fn new(connection: OaiPmhConnection, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dha-harvester/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            connection,
            max_response_bytes: mib_to_bytes(DEFAULT_MAX_RESPONSE_SIZE_MIB),
        })
    }

    /// Fail any response whose body grows beyond `limit` bytes
    pub fn with_max_response_bytes(mut self, limit: u64) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn connection(&self) -> &OaiPmhConnection {
        &self.connection
    }

    /// Issue one verb request and return the response body
    ///
    /// The body is read chunk by chunk and abandoned as soon as it exceeds
    /// the size limit. A non-success status is a protocol error carrying the
    /// body.
    async fn request(&self, params: &[(&str, &str)]) -> OaiResult<Vec<u8>> {
        let mut url = self.connection.endpoint().clone();
        url.query_pairs_mut().extend_pairs(params);
        info!(url = %url, "Requesting");

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(OaiPmhError::Transport)?;
        let status = response.status();
        debug!(status = %status, elapsed = ?started.elapsed(), "Response received");

        if let Some(announced) = response.content_length() {
            if announced > self.max_response_bytes {
                return Err(self.too_large(announced, &[]));
            }
        }

        let read_started = Instant::now();
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(OaiPmhError::Transport)?;
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_response_bytes {
                return Err(self.too_large(size, &body));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(bytes = body.len(), elapsed = ?read_started.elapsed(), "Response body read");

        if !status.is_success() {
            return Err(OaiPmhError::protocol(
                format!("endpoint answered {}", status),
                crate::error::excerpt(&String::from_utf8_lossy(&body)),
            ));
        }
        Ok(body)
    }

    fn too_large(&self, size: u64, partial: &[u8]) -> OaiPmhError {
        OaiPmhError::protocol(
            format!(
                "response of at least {} exceeds the {} limit",
                format_bytes(size),
                format_bytes(self.max_response_bytes)
            ),
            crate::error::excerpt(&String::from_utf8_lossy(partial)),
        )
    }
}

#[async_trait]
impl MetadataSource for OaiPmhClient {
    async fn list_identifiers(&self) -> OaiResult<Vec<RecordHeader>> {
        let mut headers = Vec::new();
        let mut seen_tokens = HashSet::new();

        let mut params = vec![
            ("verb", "ListIdentifiers"),
            ("metadataPrefix", self.connection.metadata_prefix()),
        ];
        if let Some(set) = self.connection.set() {
            params.push(("set", set));
        }
        let mut body = self.request(&params).await?;

        loop {
            let parse_started = Instant::now();
            let page = envelope::parse_list_identifiers(&body)?;
            debug!(
                headers = page.headers.len(),
                elapsed = ?parse_started.elapsed(),
                "ListIdentifiers page parsed"
            );
            headers.extend(page.headers);

            let Some(token) = page.resumption_token else {
                break;
            };
            if !seen_tokens.insert(token.clone()) {
                return Err(OaiPmhError::protocol(
                    format!("endpoint repeated resumption token '{}'", token),
                    String::new(),
                ));
            }
            body = self
                .request(&[("verb", "ListIdentifiers"), ("resumptionToken", token.as_str())])
                .await?;
        }

        Ok(headers)
    }

    async fn get_record(&self, identifier: &str) -> OaiResult<RdfPayload> {
        let body = self
            .request(&[
                ("verb", "GetRecord"),
                ("metadataPrefix", self.connection.metadata_prefix()),
                ("identifier", identifier),
            ])
            .await?;

        let parse_started = Instant::now();
        let payload = envelope::parse_get_record(&body, identifier)?;
        debug!(
            identifier,
            bytes = payload.rdf_xml.len(),
            elapsed = ?parse_started.elapsed(),
            "GetRecord parsed"
        );
        Ok(payload)
    }
}
