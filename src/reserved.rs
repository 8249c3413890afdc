//! Recognition of reserved CouchDB path shapes.
//!
//! Every matcher takes a path with a leading slash, relative to the server
//! root, and returns `None` when the path does not have its shape so callers
//! can try several in turn before falling back to database/document
//! resolution.
use strum::{Display, EnumString};

/// Database-scoped control endpoints, `/<db>/<command>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum DbCommand {
    #[strum(serialize = "_view_cleanup")]
    ViewCleanup,
    #[strum(serialize = "_ensure_full_commit")]
    EnsureFullCommit,
    #[strum(serialize = "_compact")]
    Compact,
    #[strum(serialize = "_purge")]
    Purge,
}

/// Server-level endpoints addressed by a single reserved segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum RootEndpoint {
    #[strum(serialize = "_all_dbs")]
    AllDbs,
    #[strum(serialize = "_cluster_setup")]
    ClusterSetup,
    #[strum(serialize = "_replicate")]
    Replicate,
}

/// A `/_node/<node>/_config[/<section>[/<key>]]` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocator {
    pub node: String,
    /// `section` or `section/key`; empty means the whole config.
    pub key: String,
}

/// A `/<db>/_compact/<ddoc>` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactViewsLocator {
    pub db: String,
    pub ddoc: String,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

pub fn config_locator(path: &str) -> Option<ConfigLocator> {
    let parts = segments(path);
    if parts.len() < 4 || parts[1] != "_node" || parts[3] != "_config" {
        return None;
    }
    Some(ConfigLocator {
        node: parts[2].to_string(),
        key: parts[4..].join("/"),
    })
}

pub fn security_locator(path: &str) -> Option<String> {
    match segments(path).as_slice() {
        ["", db, "_security"] if !db.is_empty() => Some(db.to_string()),
        _ => None,
    }
}

pub fn db_command_locator(path: &str) -> Option<(DbCommand, String)> {
    match segments(path).as_slice() {
        ["", db, command] if !db.is_empty() => {
            let command = command.parse::<DbCommand>().ok()?;
            Some((command, db.to_string()))
        }
        _ => None,
    }
}

pub fn compact_views_locator(path: &str) -> Option<CompactViewsLocator> {
    match segments(path).as_slice() {
        ["", db, "_compact", ddoc] if !db.is_empty() && !ddoc.is_empty() => {
            Some(CompactViewsLocator {
                db: db.to_string(),
                ddoc: ddoc.to_string(),
            })
        }
        _ => None,
    }
}

pub fn root_endpoint(path: &str) -> Option<RootEndpoint> {
    path.strip_prefix('/')?.parse().ok()
}
