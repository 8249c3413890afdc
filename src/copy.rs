//! Copying a document, either with the server's `COPY` or, across databases
//! and servers, by reading the source and writing the target.
use serde_json::Value;
use tracing::debug;

use crate::client::{ApiRequest, Body, Method};
use crate::context::Context;
use crate::dsn::parse_dsn;
use crate::error::{CliError, CliResult};
use crate::operation::{doc_path, require_database};
use crate::password_sanitizer::sanitize_dsn;
use crate::resolver::Resolved;

const DESTINATION: &str = "Destination";

#[derive(Debug, Clone, PartialEq)]
pub enum CopyPlan {
    /// A single `COPY` request within the source database.
    Server(ApiRequest),
    /// `GET` the source, then `PUT` it to `store` on the server of `target`.
    Emulated {
        fetch: ApiRequest,
        target: Context,
        store: ApiRequest,
    },
}

/// Whether the target lives in another database or on another server, where
/// `COPY` cannot reach.
pub fn should_emulate(source: &Context, target: &Context) -> bool {
    (!target.host.is_empty() && target.host != source.host)
        || (!target.database.is_empty() && target.database != source.database)
}

impl CopyPlan {
    /// Plans copying the document of `source` to `target_dsn`. The target
    /// revision comes from `target_rev`, else from `?rev=` on the target.
    pub fn plan(
        source: &Resolved,
        target_dsn: Option<&str>,
        target_rev: Option<&str>,
    ) -> CliResult<Self> {
        let (db, doc) = source.context.db_doc()?;
        if doc.is_empty() {
            return Err(CliError::usage("document ID required"));
        }
        require_database(&db)?;

        let target_dsn = target_dsn.ok_or_else(|| CliError::usage("missing target"))?;
        let (target, target_options) =
            parse_dsn(target_dsn).map_err(|e| CliError::usage(format!("invalid target: {e}")))?;
        if target.doc_id.is_empty() {
            return Err(CliError::usage("target document ID required"));
        }
        let target_rev = target_rev
            .map(str::to_string)
            .or_else(|| target_options.get("rev").cloned())
            .filter(|rev| !rev.is_empty());
        debug!("Will copy {db}/{doc} to {}", sanitize_dsn(&target.dsn()));

        if !should_emulate(&source.context, &target) {
            let destination = match &target_rev {
                Some(rev) => format!("{}?rev={rev}", target.doc_id),
                None => target.doc_id.clone(),
            };
            return Ok(CopyPlan::Server(
                ApiRequest::new(Method::Copy, doc_path(&db, &doc))
                    .with_header(DESTINATION, destination),
            ));
        }

        let target = target.merge(Some(&source.context));
        require_database(&target.database)?;
        debug!("Copying across databases, emulating with GET and PUT");
        let fetch = ApiRequest::new(Method::Get, doc_path(&db, &doc))
            .with_query(source.options.query_pairs());
        let rev_query = target_rev.map(|rev| ("rev".to_string(), rev));
        let store = ApiRequest::new(Method::Put, doc_path(&target.database, &target.doc_id))
            .with_query(rev_query.into_iter().collect());
        Ok(CopyPlan::Emulated {
            fetch,
            target,
            store,
        })
    }
}

/// Turns a fetched source document into the body stored at the target. The
/// source's `_id` and `_rev` do not apply there.
pub fn target_body(source: Value) -> CliResult<Body> {
    let Value::Object(mut doc) = source else {
        return Err(CliError::Protocol(
            "expected a JSON object for the source document".to_string(),
        ));
    };
    doc.remove("_id");
    doc.remove("_rev");
    Ok(Body::Json(Value::Object(doc)))
}
