//! Resolution of the positional DSN into the resource a command acts on.
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::Config;
use crate::context::Context;
use crate::dsn::parse_dsn;
use crate::error::{CliError, CliResult};
use crate::options::{CliOptions, Options};
use crate::password_sanitizer::sanitize_dsn;
use crate::reserved::{
    DbCommand, RootEndpoint, compact_views_locator, config_locator, db_command_locator,
    root_endpoint, security_locator,
};

/// Where a command is in its lifetime. Usage errors raised while
/// `Resolving` are reported with a usage hint; once `Executing`, every error
/// is operational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    Executing,
}

/// The kind of resource a resolved DSN points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Server,
    AllDbs,
    ClusterSetup,
    Replicate,
    Config { node: String, key: String },
    Security { db: String },
    DbCommand { command: DbCommand, db: String },
    CompactViews { db: String, ddoc: String },
    Database { db: String },
    Document { db: String, doc: String },
    Attachment { db: String, doc: String, filename: String },
}

impl Target {
    /// Classifies a context. Reserved paths are tried first; anything else
    /// is an attachment, document, database or the server itself.
    pub fn classify(context: &Context) -> Target {
        let path = context.resource_path();

        if let Some(locator) = compact_views_locator(&path) {
            return Target::CompactViews {
                db: locator.db,
                ddoc: locator.ddoc,
            };
        }
        if let Some((command, db)) = db_command_locator(&path) {
            return Target::DbCommand { command, db };
        }
        if let Some(endpoint) = root_endpoint(&path) {
            return match endpoint {
                RootEndpoint::AllDbs => Target::AllDbs,
                RootEndpoint::ClusterSetup => Target::ClusterSetup,
                RootEndpoint::Replicate => Target::Replicate,
            };
        }
        if let Some(locator) = config_locator(&path) {
            return Target::Config {
                node: locator.node,
                key: locator.key,
            };
        }
        if let Some(db) = security_locator(&path) {
            return Target::Security { db };
        }

        if let Ok((db, doc, filename)) = context.db_doc_filename() {
            return Target::Attachment { db, doc, filename };
        }
        match context.db_doc() {
            Ok((db, doc)) if !doc.is_empty() => Target::Document { db, doc },
            Ok((db, _)) => Target::Database { db },
            Err(_) => Target::Server,
        }
    }

    /// Short human description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Target::Server => "the server".to_string(),
            Target::AllDbs => "/_all_dbs".to_string(),
            Target::ClusterSetup => "/_cluster_setup".to_string(),
            Target::Replicate => "/_replicate".to_string(),
            Target::Config { node, .. } => format!("the configuration of node {node:?}"),
            Target::Security { db } => format!("the security object of {db:?}"),
            Target::DbCommand { command, db } => format!("{command} on {db:?}"),
            Target::CompactViews { db, ddoc } => format!("view compaction of {db:?}/{ddoc:?}"),
            Target::Database { db } => format!("database {db:?}"),
            Target::Document { db, doc } => format!("document {doc:?} in {db:?}"),
            Target::Attachment { filename, doc, .. } => {
                format!("attachment {filename:?} of {doc:?}")
            }
        }
    }
}

/// A fully resolved command argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub context: Context,
    pub options: Options,
    pub target: Target,
}

impl Resolved {
    /// Parses `dsn`, merges it with the current context, collects options
    /// and classifies the result. Without a DSN the current context is used
    /// unchanged.
    pub fn resolve(config: &Config, dsn: Option<&str>, cli: &CliOptions) -> CliResult<Self> {
        let (context, query) = match dsn {
            Some(raw) => {
                let (parsed, query) = parse_dsn(raw)?;
                debug!("Parsed DSN {:?} into {:?}", sanitize_dsn(raw), parsed.path());
                (parsed.merge(config.current_context().ok()), query)
            }
            None => (config.current_context()?.clone(), BTreeMap::new()),
        };
        let options = Options::collect(query, cli)?;
        let target = Target::classify(&context);
        info!(
            "Resolved {} to {}",
            sanitize_dsn(&context.dsn()),
            target.describe()
        );
        Ok(Resolved {
            context,
            options,
            target,
        })
    }
}

/// An error together with the phase it was raised in.
#[derive(Debug)]
pub struct PhasedError {
    pub phase: Phase,
    pub error: CliError,
}

impl PhasedError {
    pub fn new(phase: Phase, error: CliError) -> Self {
        PhasedError { phase, error }
    }

    /// Whether the usage hint should follow the error message.
    pub fn wants_usage_hint(&self) -> bool {
        self.phase == Phase::Resolving && self.error.is_usage()
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CONFIG: &str = r#"
current_context = "foo"

[contexts.foo]
dsn = "http://admin:abc123@h:5984/foo"

[contexts.other]
dsn = "https://other:6984/"
"#;

    fn config() -> Config {
        Config::from_toml(CONFIG).unwrap()
    }

    fn resolve(dsn: &str) -> Resolved {
        Resolved::resolve(&config(), Some(dsn), &CliOptions::default()).unwrap()
    }

    fn db(db: &str) -> Target {
        Target::Database { db: db.to_string() }
    }

    fn doc(db: &str, doc: &str) -> Target {
        Target::Document {
            db: db.to_string(),
            doc: doc.to_string(),
        }
    }

    #[rstest]
    #[case("http://h/", Target::Server)]
    #[case("http://h/_all_dbs", Target::AllDbs)]
    #[case("http://h/_cluster_setup", Target::ClusterSetup)]
    #[case("http://h/_replicate", Target::Replicate)]
    #[case("http://h/_node/_local/_config", Target::Config { node: "_local".into(), key: "".into() })]
    #[case("http://h/_node/n1/_config/log/level", Target::Config { node: "n1".into(), key: "log/level".into() })]
    #[case("http://h/db/_security", Target::Security { db: "db".into() })]
    #[case("http://h/db/_purge", Target::DbCommand { command: DbCommand::Purge, db: "db".into() })]
    #[case("http://h/db/_compact", Target::DbCommand { command: DbCommand::Compact, db: "db".into() })]
    #[case("http://h/db/_compact/ddoc", Target::CompactViews { db: "db".into(), ddoc: "ddoc".into() })]
    #[case("http://h/db", db("db"))]
    #[case("http://h/db/doc", doc("db", "doc"))]
    #[case("http://h/db/_design/foo", doc("db", "_design/foo"))]
    #[case("http://h/db/_local/foo", doc("db", "_local/foo"))]
    #[case("http://h/db/doc/", doc("db", "doc"))]
    #[case("http://h/_design/foo/att.txt", Target::Attachment { db: "".into(), doc: "_design/foo".into(), filename: "att.txt".into() })]
    #[case("http://h/db/doc/file.txt", Target::Attachment { db: "db".into(), doc: "doc".into(), filename: "file.txt".into() })]
    #[case("http://h/couchdb//db", db("db"))]
    #[case("http://h/couchdb//db/_security", Target::Security { db: "db".into() })]
    #[case("http://h/couchdb//_all_dbs", Target::AllDbs)]
    fn test_classify(#[case] dsn: &str, #[case] expected: Target) {
        assert_eq!(resolve(dsn).target, expected);
    }

    #[test]
    fn test_bare_segment_is_a_document_in_the_current_database() {
        let resolved = resolve("bar");
        assert_eq!(resolved.context.host, "h:5984");
        assert_eq!(resolved.context.database, "foo");
        assert_eq!(resolved.context.doc_id, "bar");
        assert_eq!(resolved.target, doc("foo", "bar"));
    }

    #[test]
    fn test_partial_dsn_keeps_its_database() {
        let resolved = resolve("B/doc");
        assert_eq!(resolved.context.scheme, "http");
        assert_eq!(resolved.context.host, "h:5984");
        assert_eq!(resolved.context.user, "admin");
        assert_eq!(resolved.context.database, "B");
        assert_eq!(resolved.target, doc("B", "doc"));
    }

    #[test]
    fn test_full_dsn_ignores_current_context() {
        let resolved = resolve("https://x:6984/db");
        assert_eq!(resolved.context.host, "x:6984");
        assert_eq!(resolved.context.user, "");
        assert_eq!(resolved.target, db("db"));
    }

    #[test]
    fn test_full_dsn_without_current_context() {
        let mut config = config();
        config.current_context = None;
        let resolved =
            Resolved::resolve(&config, Some("http://x/db/doc"), &CliOptions::default()).unwrap();
        assert_eq!(resolved.target, doc("db", "doc"));
    }

    #[test]
    fn test_no_dsn_uses_current_context() {
        let resolved = Resolved::resolve(&config(), None, &CliOptions::default()).unwrap();
        assert_eq!(resolved.context.host, "h:5984");
        assert_eq!(resolved.target, db("foo"));

        let err = Resolved::resolve(&Config::default(), None, &CliOptions::default()).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "no context specified");
    }

    #[test]
    fn test_query_and_cli_options() {
        let cli = CliOptions {
            strings: vec![("rev".to_string(), "2-b".to_string())],
            bools: vec![("conflicts".to_string(), "t".to_string())],
        };
        let resolved = Resolved::resolve(&config(), Some("doc?rev=1-a"), &cli).unwrap();
        assert_eq!(resolved.options.get_str("rev"), Some("1-a"));
        assert_eq!(resolved.target, doc("foo", "doc"));
    }

    #[test]
    fn test_invalid_dsn_is_usage_error() {
        let err = Resolved::resolve(&config(), Some("http://h/%xxx"), &CliOptions::default())
            .unwrap_err();
        assert!(err.is_usage());
        assert!(err.to_string().contains("invalid URL escape"));
    }

    #[test]
    fn test_usage_hint_only_while_resolving() {
        let resolving = PhasedError::new(Phase::Resolving, CliError::usage("document ID required"));
        assert!(resolving.wants_usage_hint());
        let executing = PhasedError::new(Phase::Executing, CliError::usage("document ID required"));
        assert!(!executing.wants_usage_hint());
        assert_eq!(executing.exit_code(), 2);
        let http = PhasedError::new(
            Phase::Resolving,
            CliError::Http {
                status: 404,
                reason: "Not Found".to_string(),
            },
        );
        assert!(!http.wants_usage_hint());
    }
}
