//! The resolved resource descriptor every command works from.
use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{CliError, CliResult};
use crate::password_sanitizer::sanitize_dsn;
use crate::path_split::{split_path, split_root};

/// ID namespaces whose documents are addressed as `<namespace>/<name>`.
const DOC_NAMESPACES: [&str; 2] = ["_design", "_local"];

fn is_doc_namespace(segment: &str) -> bool {
    DOC_NAMESPACES.contains(&segment)
}

fn is_namespaced(doc_id: &str) -> bool {
    doc_id
        .split_once('/')
        .is_some_and(|(namespace, name)| is_doc_namespace(namespace) && !name.is_empty())
}

/// Splits `dir/base` into database and document, joining `base` with a
/// trailing `_design` or `_local` segment of `dir`.
pub(crate) fn fold_namespace(dir: &str, base: &str) -> (String, String) {
    let (parent, last) = dir.rsplit_once('/').unwrap_or(("", dir));
    if is_doc_namespace(last) {
        (parent.to_string(), format!("{last}/{base}"))
    } else {
        (dir.to_string(), base.to_string())
    }
}

const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const USERINFO_ENCODE_SET: &AsciiSet = &PATH_ENCODE_SET.add(b'/').add(b':').add(b'@');

/// A complete, or partial, description of a server and the resource on it.
///
/// A context without a host is partial: it only becomes usable once merged
/// with a previously known context that supplies the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "crate::config::ContextEntry")]
pub struct Context {
    pub scheme: String,
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Document ID. Design documents keep their `_design/` prefix.
    pub doc_id: String,
}

impl Context {
    pub fn is_partial(&self) -> bool {
        self.host.is_empty()
    }

    /// Fills in the server (and, if missing, the database) of a partial
    /// context from `current`. A context with a host is returned unchanged.
    pub fn merge(mut self, current: Option<&Context>) -> Context {
        let Some(current) = current else {
            return self;
        };
        if !self.is_partial() {
            return self;
        }
        debug!(
            "Incomplete DSN {:?}, merging with current context {}",
            self.path(),
            sanitize_dsn(&current.dsn())
        );
        self.scheme = current.scheme.clone();
        self.host = current.host.clone();
        self.user = current.user.clone();
        self.password = current.password.clone();
        if self.database.is_empty() {
            self.database = current.database.clone();
        }
        self
    }

    /// The database and document joined into a path, without a leading
    /// slash.
    pub fn path(&self) -> String {
        match (self.database.is_empty(), self.doc_id.is_empty()) {
            (true, _) => self.doc_id.clone(),
            (false, true) => self.database.clone(),
            (false, false) => format!("{}/{}", self.database, self.doc_id),
        }
    }

    /// The fixed server root given with a `//` boundary, without slashes.
    pub fn root(&self) -> String {
        let path = self.path();
        let (root, _) = split_root(&path);
        root.trim_matches('/').to_string()
    }

    /// The path below the server root, with a leading slash.
    pub fn resource_path(&self) -> String {
        let path = self.path();
        let (_, rest) = split_root(&path);
        format!("/{}", rest.trim_start_matches('/'))
    }

    fn has_userinfo(&self) -> bool {
        !self.user.is_empty() || !self.password.is_empty()
    }

    fn format_dsn(&self, path: &str) -> String {
        let mut out = String::new();
        if !self.scheme.is_empty() {
            out.push_str(&self.scheme);
            out.push(':');
        }
        let has_authority = !self.scheme.is_empty() || !self.host.is_empty() || self.has_userinfo();
        if has_authority {
            out.push_str("//");
            if self.has_userinfo() {
                out.extend(utf8_percent_encode(&self.user, USERINFO_ENCODE_SET));
                if !self.password.is_empty() {
                    out.push(':');
                    out.extend(utf8_percent_encode(&self.password, USERINFO_ENCODE_SET));
                }
                out.push('@');
            }
            out.push_str(&self.host);
        }
        if !path.is_empty() {
            if has_authority {
                out.push('/');
            }
            out.extend(utf8_percent_encode(path, PATH_ENCODE_SET));
        }
        out
    }

    /// The full DSN, including credentials, database and document.
    pub fn dsn(&self) -> String {
        self.format_dsn(&self.path())
    }

    /// The DSN of the server alone, with no database or document.
    pub fn server_dsn(&self) -> String {
        self.format_dsn("")
    }

    /// Returns the database, failing if the DSN also names a document.
    pub fn db(&self) -> CliResult<String> {
        let parts = split_path(&self.path());
        if !parts.document.is_empty() {
            return Err(CliError::usage("DSN expected to contain only the database"));
        }
        Ok(parts.database)
    }

    /// Returns the database and document ID.
    ///
    /// The last path element is the document and everything before it the
    /// database, so database names may contain slashes. A path ending in
    /// `_design/<name>` or `_local/<name>` yields that prefixed document. A
    /// single element is a database.
    pub fn db_doc(&self) -> CliResult<(String, String)> {
        let path = self.resource_path();
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(CliError::usage("document ID required"));
        }
        let (db, doc) = match path.rsplit_once('/') {
            Some((dir, base)) => fold_namespace(dir.trim_matches('/'), base),
            None => (String::new(), path.to_string()),
        };
        if db.is_empty() && !is_namespaced(&doc) {
            return Ok((doc, String::new()));
        }
        Ok((db, doc))
    }

    /// Returns database, document ID and attachment filename, failing when
    /// no filename is present.
    pub fn db_doc_filename(&self) -> CliResult<(String, String, String)> {
        let parts = split_path(&self.path());
        if parts.filename.is_empty() || is_doc_namespace(&parts.document) {
            return Err(CliError::usage("attachment filename required"));
        }
        if is_doc_namespace(&parts.database) {
            let root = parts.root.trim_end_matches('/');
            let db = root.rsplit('/').next().unwrap_or_default();
            return Ok((
                db.to_string(),
                format!("{}/{}", parts.database, parts.document),
                parts.filename,
            ));
        }
        Ok((parts.database, parts.document, parts.filename))
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dsn())
    }
}
