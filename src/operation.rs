//! Turns a verb and a resolved target into a concrete server request.
//!
//! Planning is pure: every failure here is a usage error and happens before
//! the first byte goes over the network.
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};
use tracing::debug;

use crate::client::{ApiRequest, Body, Method};
use crate::error::{CliError, CliResult};
use crate::input::DocumentInput;
use crate::options::{OptionValue, Options};
use crate::reserved::{DbCommand, RootEndpoint};
use crate::resolver::{Resolved, Target};

const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";
const CONTENT_TYPE_OPTION: &str = "content_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
    Ping,
    Describe,
    Purge,
}

/// How the response is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Pretty-printed JSON.
    Json,
    /// The body as received.
    Raw,
    /// `OK` on success.
    Status,
    /// A summary built from the response headers.
    Describe(Subject),
}

/// What a `HEAD` request was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Document { id: String },
    Attachment { filename: String },
}

/// Request content given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub input: Option<DocumentInput>,
    /// Revisions for `purge`.
    pub revs: Vec<String>,
}

impl Payload {
    pub fn with_input(input: DocumentInput) -> Self {
        Payload {
            input: Some(input),
            revs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub request: ApiRequest,
    pub output: Output,
}

impl Operation {
    fn json(request: ApiRequest) -> Self {
        Operation {
            request,
            output: Output::Json,
        }
    }

    pub fn plan(verb: Verb, resolved: &Resolved, payload: &Payload) -> CliResult<Self> {
        let input = payload.input.as_ref();
        let operation = match verb {
            Verb::Get => plan_get(resolved)?,
            Verb::Put => plan_put(resolved, input)?,
            Verb::Post => plan_post(resolved, input)?,
            Verb::Delete => plan_delete(resolved)?,
            Verb::Ping => Operation {
                request: ApiRequest::new(Method::Get, ["_up"]),
                output: Output::Status,
            },
            Verb::Describe => plan_describe(resolved)?,
            Verb::Purge => plan_purge(resolved, payload)?,
        };
        debug!(
            "Planned {} {} for {verb} on {:?}",
            operation.request.method,
            operation.request.display_path(),
            resolved.target
        );
        Ok(operation)
    }
}

fn unsupported(verb: Verb, target: &Target) -> CliError {
    CliError::usage(format!("{verb} is not supported for {}", target.describe()))
}

fn require_input<'a>(
    input: Option<&'a DocumentInput>,
    what: &str,
) -> CliResult<&'a DocumentInput> {
    input.ok_or_else(|| {
        CliError::usage(format!("{what} required: use --data or --data-file"))
    })
}

/// Path elements for a document. Design and local documents keep their
/// prefix as a separate element.
pub(crate) fn doc_path(db: &str, doc: &str) -> Vec<String> {
    let mut path = vec![db.to_string()];
    match doc.split_once('/') {
        Some((prefix @ ("_design" | "_local"), name)) => {
            path.push(prefix.to_string());
            path.push(name.to_string());
        }
        _ => path.push(doc.to_string()),
    }
    path
}

fn config_path(node: &str, key: &str) -> Vec<String> {
    let mut path = vec!["_node".to_string(), node.to_string(), "_config".to_string()];
    path.extend(key.split('/').filter(|s| !s.is_empty()).map(str::to_string));
    path
}

fn require_section_key(key: &str) -> CliResult<()> {
    match key.split_once('/') {
        Some((section, key)) if !section.is_empty() && !key.is_empty() => Ok(()),
        _ => Err(CliError::usage("section/key must contain a slash")),
    }
}

pub(crate) fn require_database(db: &str) -> CliResult<()> {
    if db.is_empty() {
        return Err(CliError::usage("database name required"));
    }
    Ok(())
}

fn plan_get(resolved: &Resolved) -> CliResult<Operation> {
    let query = resolved.options.query_pairs();
    let request = match &resolved.target {
        Target::Server => ApiRequest::new(Method::Get, Vec::<String>::new()),
        Target::AllDbs => ApiRequest::new(Method::Get, [RootEndpoint::AllDbs.to_string()]),
        Target::ClusterSetup => {
            ApiRequest::new(Method::Get, [RootEndpoint::ClusterSetup.to_string()])
        }
        Target::Config { node, key } => ApiRequest::new(Method::Get, config_path(node, key)),
        Target::Security { db } => ApiRequest::new(Method::Get, [db.as_str(), "_security"]),
        Target::Attachment { db, doc, filename } => {
            require_database(db)?;
            let mut path = doc_path(db, doc);
            path.push(filename.clone());
            return Ok(Operation {
                request: ApiRequest::new(Method::Get, path)
                    .with_query(query)
                    .raw_response(),
                output: Output::Raw,
            });
        }
        Target::Document { db, doc } => {
            require_database(db)?;
            ApiRequest::new(Method::Get, doc_path(db, doc))
        }
        Target::Database { db } => ApiRequest::new(Method::Get, [db.as_str()]),
        target @ (Target::Replicate | Target::DbCommand { .. } | Target::CompactViews { .. }) => {
            return Err(unsupported(Verb::Get, target));
        }
    };
    Ok(Operation::json(request.with_query(query)))
}

fn plan_put(resolved: &Resolved, input: Option<&DocumentInput>) -> CliResult<Operation> {
    let options = &resolved.options;
    let request = match &resolved.target {
        Target::Config { node, key } => {
            require_section_key(key)?;
            let value = require_input(input, "config value")?.text();
            ApiRequest::new(Method::Put, config_path(node, key))
                .with_body(Body::Json(Value::String(value)))
        }
        Target::Security { db } => {
            let security = require_input(input, "security object")?.json()?;
            ApiRequest::new(Method::Put, [db.as_str(), "_security"])
                .with_body(Body::Json(security))
        }
        Target::Attachment { db, doc, filename } => {
            require_database(db)?;
            let content = require_input(input, "attachment content")?;
            let content_type = options
                .get_str(CONTENT_TYPE_OPTION)
                .unwrap_or(DEFAULT_ATTACHMENT_TYPE)
                .to_string();
            let query = options
                .query_pairs()
                .into_iter()
                .filter(|(k, _)| k != CONTENT_TYPE_OPTION)
                .collect();
            let mut path = doc_path(db, doc);
            path.push(filename.clone());
            return Ok(Operation::json(
                ApiRequest::new(Method::Put, path)
                    .with_query(query)
                    .with_body(Body::Raw {
                        content_type,
                        bytes: content.bytes().to_vec(),
                    }),
            ));
        }
        Target::Document { db, doc } => {
            require_database(db)?;
            let document = require_input(input, "document")?.json()?;
            ApiRequest::new(Method::Put, doc_path(db, doc)).with_body(Body::Json(document))
        }
        Target::Database { db } => ApiRequest::new(Method::Put, [db.as_str()]),
        target => return Err(unsupported(Verb::Put, target)),
    };
    Ok(Operation::json(request.with_query(options.query_pairs())))
}

fn plan_post(resolved: &Resolved, input: Option<&DocumentInput>) -> CliResult<Operation> {
    let query = resolved.options.query_pairs();
    let request = match &resolved.target {
        Target::CompactViews { db, ddoc } => {
            ApiRequest::new(Method::Post, [db.as_str(), "_compact", ddoc.as_str()])
                .with_body(Body::Json(json!({})))
        }
        Target::DbCommand { command, db } => {
            let body = match command {
                DbCommand::Purge => {
                    require_input(input, "map of document IDs to revisions")?.json()?
                }
                _ => json!({}),
            };
            ApiRequest::new(Method::Post, [db.clone(), command.to_string()])
                .with_body(Body::Json(body))
        }
        Target::Replicate => {
            let body = replication_body(&resolved.options)?;
            return Ok(Operation::json(
                ApiRequest::new(Method::Post, [RootEndpoint::Replicate.to_string()])
                    .with_body(Body::Json(body)),
            ));
        }
        Target::ClusterSetup => {
            let setup = require_input(input, "cluster setup action")?.json()?;
            ApiRequest::new(Method::Post, [RootEndpoint::ClusterSetup.to_string()])
                .with_body(Body::Json(setup))
        }
        Target::Database { db } => {
            let document = require_input(input, "document")?.json()?;
            ApiRequest::new(Method::Post, [db.as_str()]).with_body(Body::Json(document))
        }
        target => return Err(unsupported(Verb::Post, target)),
    };
    Ok(Operation::json(request.with_query(query)))
}

fn plan_delete(resolved: &Resolved) -> CliResult<Operation> {
    let request = match &resolved.target {
        Target::Config { node, key } => {
            require_section_key(key)?;
            ApiRequest::new(Method::Delete, config_path(node, key))
        }
        Target::Attachment { db, doc, filename } => {
            require_database(db)?;
            let mut path = doc_path(db, doc);
            path.push(filename.clone());
            ApiRequest::new(Method::Delete, path)
        }
        Target::Document { db, doc } => {
            require_database(db)?;
            ApiRequest::new(Method::Delete, doc_path(db, doc))
        }
        Target::Database { db } => ApiRequest::new(Method::Delete, [db.as_str()]),
        target => return Err(unsupported(Verb::Delete, target)),
    };
    Ok(Operation::json(
        request.with_query(resolved.options.query_pairs()),
    ))
}

/// Server version, database info, or the headers of a document or
/// attachment.
fn plan_describe(resolved: &Resolved) -> CliResult<Operation> {
    let query = resolved.options.query_pairs();
    let (path, subject) = match &resolved.target {
        Target::Server => {
            return Ok(Operation::json(ApiRequest::new(
                Method::Get,
                Vec::<String>::new(),
            )));
        }
        Target::Database { db } => {
            return Ok(Operation::json(
                ApiRequest::new(Method::Get, [db.as_str()]).with_query(query),
            ));
        }
        Target::Document { db, doc } => {
            require_database(db)?;
            (doc_path(db, doc), Subject::Document { id: doc.clone() })
        }
        Target::Attachment { db, doc, filename } => {
            require_database(db)?;
            let mut path = doc_path(db, doc);
            path.push(filename.clone());
            (
                path,
                Subject::Attachment {
                    filename: filename.clone(),
                },
            )
        }
        target => return Err(unsupported(Verb::Describe, target)),
    };
    Ok(Operation {
        request: ApiRequest::new(Method::Head, path)
            .with_query(query)
            .head_response(),
        output: Output::Describe(subject),
    })
}

/// Purges either the map of document IDs to revisions given as input, or
/// the revisions in `--revs` of the document named by the DSN.
fn plan_purge(resolved: &Resolved, payload: &Payload) -> CliResult<Operation> {
    let (db, revisions) = match &payload.input {
        Some(input) => {
            let db = match &resolved.target {
                Target::DbCommand {
                    command: DbCommand::Purge,
                    db,
                } => db.clone(),
                _ => resolved.context.db()?,
            };
            (db, input.json()?)
        }
        None => {
            let (db, doc) = resolved.context.db_doc()?;
            if doc.is_empty() {
                return Err(CliError::usage("document ID required"));
            }
            if payload.revs.is_empty() {
                return Err(CliError::usage("revisions required: use --revs or --data"));
            }
            let mut revisions = Map::new();
            revisions.insert(doc, Value::from(payload.revs.clone()));
            (db, Value::Object(revisions))
        }
    };
    require_database(&db)?;
    debug!("Will purge {revisions} from {db:?}");
    Ok(Operation::json(
        ApiRequest::new(Method::Post, [db, DbCommand::Purge.to_string()])
            .with_query(resolved.options.query_pairs())
            .with_body(Body::Json(revisions)),
    ))
}

/// Builds the `/_replicate` body from the options. `source` and `target`
/// may be URLs or JSON objects, `doc_ids` a comma-separated list.
fn replication_body(options: &Options) -> CliResult<Value> {
    let source = options.get_str("source").unwrap_or_default();
    let target = options.get_str("target").unwrap_or_default();
    if source.is_empty() && target.is_empty() {
        return Err(CliError::usage("explicit source or target required"));
    }
    debug!("Will replicate {source:?} to {target:?}");

    let mut body = Map::new();
    for (key, value) in options.iter() {
        let value = match (key, value) {
            ("source" | "target", OptionValue::Str(s)) if s.starts_with('{') => {
                serde_json::from_str::<Map<String, Value>>(s)
                    .map(Value::Object)
                    .map_err(|e| CliError::usage(format!("invalid {key}: {e}")))?
            }
            ("doc_ids", OptionValue::Str(s)) if !s.is_empty() => {
                Value::from(s.split(',').collect::<Vec<_>>())
            }
            (_, OptionValue::Str(s)) => Value::from(s.as_str()),
            (_, OptionValue::Bool(b)) => Value::from(*b),
        };
        body.insert(key.to_string(), value);
    }
    Ok(Value::Object(body))
}
