//! Command-line interface
//!
//! Every option can also be set through a `DHA_*` environment variable.

use crate::config::{
    BasicAuth, HarvestConfig, OaiPmhConnection, SparqlConfig, VocabularyConfig,
    DEFAULT_BATCH_SIZE_KIB, DEFAULT_MAX_RESPONSE_SIZE_MIB, DEFAULT_SPARQL_RETRIES,
    DEFAULT_TIMEOUT_SECS,
};
use crate::sparql::GraphIri;
use clap::{Args, Parser, Subcommand};
use dha_common::error::parse_http_url;
use dha_common::units::{kib_to_bytes, mib_to_bytes};
use dha_common::Result;
use std::path::PathBuf;
use std::time::Duration;

/// DHA harvester - synchronise OAI-PMH metadata into a SPARQL triplestore
#[derive(Parser, Debug)]
#[command(name = "dha-harvester")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug-level logging
    #[arg(short, long, global = true, env = "DHA_VERBOSE")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replace a named graph with the RDF of every record of an OAI-PMH endpoint
    Oaipmh(OaiPmhArgs),

    /// Add concept descriptions to the graphs that reference them
    Vocabulary(VocabularyArgs),
}

/// Triplestore options shared by both commands
#[derive(Args, Debug, Clone)]
pub struct SparqlArgs {
    /// Triplestore user
    #[arg(long, env = "DHA_SPARQL_USER")]
    pub sparql_user: Option<String>,

    /// Triplestore password
    #[arg(long, env = "DHA_SPARQL_PASSWORD", hide_env_values = true)]
    pub sparql_password: Option<String>,

    /// Maximum size of a single SPARQL UPDATE payload in KiB
    #[arg(long, env = "DHA_SPARQL_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE_KIB)]
    pub sparql_batch_size: u64,

    /// How many times a failed SPARQL UPDATE is repeated
    #[arg(long, env = "DHA_SPARQL_RETRIES", default_value_t = DEFAULT_SPARQL_RETRIES)]
    pub sparql_retries: u32,

    /// Request timeout in seconds
    #[arg(long, env = "DHA_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
}

impl SparqlArgs {
    fn into_config(self, sparql_url: &str) -> Result<SparqlConfig> {
        let mut config = SparqlConfig::new(parse_http_url(sparql_url)?);
        config.auth = BasicAuth::from_parts(self.sparql_user, self.sparql_password)?;
        config.timeout = Duration::from_secs(self.timeout);
        config.batch_bytes = kib_to_bytes(self.sparql_batch_size);
        config.retries = self.sparql_retries;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct OaiPmhArgs {
    /// OAI-PMH connection: "{endpoint URL}#{metadataPrefix}#{set (optional)}"
    #[arg(env = "DHA_OAIPMH_CONNECTION")]
    pub oaipmh_connection: String,

    /// SPARQL endpoint URL
    #[arg(env = "DHA_SPARQL_URL")]
    pub sparql_url: String,

    #[command(flatten)]
    pub sparql: SparqlArgs,

    /// Skip batches that keep failing instead of aborting the import
    #[arg(long, env = "DHA_SPARQL_CONTINUE_ON_FAILURE")]
    pub sparql_continue_on_failure: bool,

    /// Harvest only this record
    #[arg(long, env = "DHA_OAIPMH_ID")]
    pub oaipmh_id: Option<String>,

    /// Largest OAI-PMH response accepted, in MiB
    #[arg(long, env = "DHA_OAIPMH_MAX_RESPONSE_SIZE", default_value_t = DEFAULT_MAX_RESPONSE_SIZE_MIB)]
    pub oaipmh_max_response_size: u64,

    /// Directory for the temporary spool file
    #[arg(long, env = "DHA_TMP_DIR", default_value = ".")]
    pub tmp_dir: PathBuf,
}

impl OaiPmhArgs {
    pub fn into_config(self) -> Result<HarvestConfig> {
        let source: OaiPmhConnection = self.oaipmh_connection.parse()?;
        let timeout = Duration::from_secs(self.sparql.timeout);
        let mut sparql = self.sparql.into_config(&self.sparql_url)?;
        sparql.continue_on_failure = self.sparql_continue_on_failure;

        let mut config = HarvestConfig::new(source, sparql);
        config.timeout = timeout;
        config.record_id = self.oaipmh_id;
        config.max_response_bytes = mib_to_bytes(self.oaipmh_max_response_size);
        config.spool_dir = self.tmp_dir;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct VocabularyArgs {
    /// SPARQL endpoint URL
    #[arg(env = "DHA_SPARQL_URL")]
    pub sparql_url: String,

    /// IRI prefix of the concepts to fetch
    #[arg(env = "DHA_CONCEPTS_NAMESPACE")]
    pub concepts_namespace: String,

    #[command(flatten)]
    pub sparql: SparqlArgs,

    /// Only enrich this graph
    #[arg(long, env = "DHA_SPARQL_GRAPH")]
    pub sparql_graph: Option<String>,
}

impl VocabularyArgs {
    pub fn into_config(self) -> Result<VocabularyConfig> {
        let graph = self
            .sparql_graph
            .as_deref()
            .filter(|g| !g.is_empty())
            .map(GraphIri::parse)
            .transpose()?;
        let config = VocabularyConfig {
            sparql: self.sparql.into_config(&self.sparql_url)?,
            namespace: self.concepts_namespace,
            graph,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sparql::SyncPolicy;

    fn oaipmh(args: &[&str]) -> OaiPmhArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Oaipmh(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_oaipmh_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().to_str().unwrap();
        let args = oaipmh(&[
            "dha-harvester",
            "oaipmh",
            "https://example.org/oai#oai_rdf#coll",
            "http://localhost:8890/sparql",
            "--tmp-dir",
            tmp,
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.source.set(), Some("coll"));
        assert_eq!(config.timeout, Duration::from_secs(1800));
        assert_eq!(config.sparql.batch_bytes, 150 * 1024);
        assert_eq!(SyncPolicy::from(&config.sparql).attempts(), 3);
        assert_eq!(config.max_response_bytes, 256 * 1024 * 1024);
        assert!(!config.sparql.continue_on_failure);
        assert!(config.sparql.auth.is_none());
        assert!(config.record_id.is_none());
    }

    #[test]
    fn test_oaipmh_all_options() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().to_str().unwrap();
        let args = oaipmh(&[
            "dha-harvester",
            "--verbose",
            "oaipmh",
            "https://example.org/oai#oai_rdf",
            "http://localhost:8890/sparql",
            "--timeout",
            "60",
            "--sparql-user",
            "dba",
            "--sparql-password",
            "secret",
            "--sparql-batch-size",
            "10",
            "--sparql-retries",
            "0",
            "--sparql-continue-on-failure",
            "--oaipmh-id",
            "oai:example.org:1",
            "--oaipmh-max-response-size",
            "8",
            "--tmp-dir",
            tmp,
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.sparql.batch_bytes, 10 * 1024);
        assert_eq!(SyncPolicy::from(&config.sparql).attempts(), 1);
        assert_eq!(config.max_response_bytes, 8 * 1024 * 1024);
        assert!(config.sparql.continue_on_failure);
        assert_eq!(config.sparql.auth.unwrap().user, "dba");
        assert_eq!(config.record_id.as_deref(), Some("oai:example.org:1"));
    }

    #[test]
    fn test_oaipmh_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().to_str().unwrap();
        let config = |connection: &'static str, sparql: &'static str, extra: &[&'static str]| {
            let mut argv: Vec<&str> = vec!["dha-harvester", "oaipmh", connection, sparql];
            argv.extend_from_slice(extra);
            argv.extend_from_slice(&["--tmp-dir", tmp]);
            oaipmh(&argv).into_config()
        };

        assert!(config("https://example.org/oai", "http://localhost/sparql", &[]).is_err());
        assert!(config("https://example.org/oai#p", "not a url", &[]).is_err());
        assert!(config("https://example.org/oai#p", "http://localhost/sparql", &["--sparql-batch-size", "0"]).is_err());
        assert!(config("https://example.org/oai#p", "http://localhost/sparql", &["--timeout", "0"]).is_err());
        assert!(config("https://example.org/oai#p", "http://localhost/sparql", &["--oaipmh-max-response-size", "0"]).is_err());
        assert!(config("https://example.org/oai#p", "http://localhost/sparql", &["--sparql-user", "dba"]).is_err());
        assert!(config("https://example.org/oai#p", "http://localhost/sparql", &[]).is_ok());
    }

    #[test]
    fn test_vocabulary_command() {
        let cli = Cli::try_parse_from([
            "dha-harvester",
            "vocabulary",
            "http://localhost:8890/sparql",
            "https://vocabs.example.org/",
            "--sparql-graph",
            "https://example.org/oai",
        ])
        .unwrap();
        let Command::Vocabulary(args) = cli.command else {
            panic!("expected vocabulary command");
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.namespace, "https://vocabs.example.org/");
        assert_eq!(config.graph.unwrap().as_str(), "https://example.org/oai");
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["dha-harvester"]).is_err());
    }
}
