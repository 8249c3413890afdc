//! Parsing of DSN strings into a [`Context`] plus query options.
//!
//! The accepted grammar is looser than a URL: `http://host/db/doc`,
//! `db/doc`, `doc`, a filesystem path (`/abs/path`, `./rel/path`) or a
//! full URL with query parameters. Anything without `scheme://` is a path.
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::debug;

use crate::context::{Context, fold_namespace};
use crate::error::CliError;

#[derive(Error, Debug)]
pub enum DsnError {
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),

    #[error("invalid UTF-8 in {0:?}")]
    InvalidUtf8(String),

    #[error("missing protocol scheme in {0:?}")]
    MissingScheme(String),

    #[error("cannot resolve relative path {path:?}: {source}")]
    WorkingDirectory {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl From<DsnError> for CliError {
    fn from(err: DsnError) -> Self {
        CliError::Usage(format!("invalid DSN: {err}"))
    }
}

/// Parses `raw`, resolving relative filesystem paths against the current
/// working directory.
pub fn parse_dsn(raw: &str) -> Result<(Context, BTreeMap<String, String>), DsnError> {
    parse(raw, std::env::current_dir)
}

/// Parses `raw`, resolving relative filesystem paths against `cwd`.
pub fn parse_dsn_in(
    raw: &str,
    cwd: &Path,
) -> Result<(Context, BTreeMap<String, String>), DsnError> {
    parse(raw, || Ok(cwd.to_path_buf()))
}

fn parse(
    raw: &str,
    cwd: impl FnOnce() -> io::Result<PathBuf>,
) -> Result<(Context, BTreeMap<String, String>), DsnError> {
    let raw = rewrite_file_path(raw, cwd)?;
    let without_fragment = raw.split_once('#').map_or(&*raw, |(head, _)| head);
    let (rest, query) = match without_fragment.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (without_fragment, None),
    };

    let (scheme, rest) = match rest.find("://") {
        Some(0) => return Err(DsnError::MissingScheme(raw.to_string())),
        Some(i) if is_scheme(&rest[..i]) => (rest[..i].to_ascii_lowercase(), &rest[i + 1..]),
        _ => (String::new(), rest),
    };

    let mut cx = Context {
        scheme,
        ..Default::default()
    };
    let mut path = rest;
    if let Some(after) = rest.strip_prefix("//") {
        let (authority, remainder) = match after.find('/') {
            Some(i) => (&after[..i], &after[i..]),
            None => (after, ""),
        };
        let host = match authority.rsplit_once('@') {
            Some((userinfo, host)) => {
                let (user, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                cx.user = decode(user)?;
                cx.password = decode(password)?;
                host
            }
            None => authority,
        };
        cx.host = host.to_string();
        path = remainder;
    }

    let mut path = decode(path)?;
    if (!cx.scheme.is_empty() || !cx.host.is_empty()) && path.starts_with('/') {
        path.remove(0);
    }
    let (database, doc_id) = split_database_doc(&path);
    if cx.host.is_empty() && doc_id.is_empty() {
        cx.doc_id = database;
    } else {
        cx.database = database;
        cx.doc_id = doc_id;
    }

    let options = match query {
        Some(query) => {
            check_escapes(query)?;
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        }
        None => BTreeMap::new(),
    };
    Ok((cx, options))
}

fn rewrite_file_path(
    raw: &str,
    cwd: impl FnOnce() -> io::Result<PathBuf>,
) -> Result<Cow<'_, str>, DsnError> {
    if raw.starts_with('/') {
        debug!("Treating DSN {raw:?} as an absolute file path");
        return Ok(Cow::Owned(format!("file://{raw}")));
    }
    if raw.starts_with('.') {
        let cwd = cwd().map_err(|source| DsnError::WorkingDirectory {
            path: raw.to_string(),
            source,
        })?;
        let absolute = normalize(&cwd.join(raw));
        debug!("Treating DSN {raw:?} as file path {}", absolute.display());
        return Ok(Cow::Owned(format!("file://{}", absolute.display())));
    }
    Ok(Cow::Borrowed(raw))
}

/// Lexically resolves `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Splits a path into database and document ID. The final segment is the
/// document unless it follows `_design` or `_local`, in which case both form
/// the ID. A single trailing slash is ignored.
fn split_database_doc(path: &str) -> (String, String) {
    let path = path.strip_suffix('/').unwrap_or(path);
    match path.rsplit_once('/') {
        Some((dir, base)) if !base.is_empty() => fold_namespace(dir, base),
        Some((dir, base)) => (dir.to_string(), base.to_string()),
        None => (path.to_string(), String::new()),
    }
}

fn check_escapes(component: &str) -> Result<(), DsnError> {
    let bytes = component.as_bytes();
    for (i, _) in bytes.iter().enumerate().filter(|(_, b)| **b == b'%') {
        let is_hex = |at: usize| bytes.get(at).is_some_and(u8::is_ascii_hexdigit);
        if !(is_hex(i + 1) && is_hex(i + 2)) {
            let end = (i + 3).min(bytes.len());
            return Err(DsnError::InvalidEscape(
                String::from_utf8_lossy(&bytes[i..end]).into_owned(),
            ));
        }
    }
    Ok(())
}

fn decode(component: &str) -> Result<String, DsnError> {
    check_escapes(component)?;
    percent_decode_str(component)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| DsnError::InvalidUtf8(component.to_string()))
}
