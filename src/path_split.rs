//! Splitting of DSN paths into server root, database, document and
//! attachment filename.

/// Marks the end of a fixed server root, for servers mounted under a
/// URL subdirectory: `/couchdb//db/doc` has the root `/couchdb/`.
pub const ROOT_BOUNDARY: &str = "//";

const MAX_LEAVES: usize = 3;

/// The four slots a path splits into. Missing slots are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParts {
    pub root: String,
    pub database: String,
    pub document: String,
    pub filename: String,
}

impl PathParts {
    pub fn as_tuple(&self) -> (&str, &str, &str, &str) {
        (&self.root, &self.database, &self.document, &self.filename)
    }
}

/// Splits `path` into root, database, document and filename.
///
/// At most the last three path elements are treated as database, document
/// and filename; anything before them is the root. A `//` anywhere in the
/// path fixes everything before it as root and splitting resumes after it.
pub fn split_path(path: &str) -> PathParts {
    if let Some((fixed, rest)) = path.split_once(ROOT_BOUNDARY) {
        let mut parts = split_path(rest);
        parts.root = format!("{fixed}/{}", parts.root);
        return parts;
    }

    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let leaf_count = segments.len().min(MAX_LEAVES);
    let mut leaves = segments.split_off(segments.len() - leaf_count).into_iter();

    let root = if segments.is_empty() {
        String::new()
    } else if path.starts_with('/') {
        format!("/{}", segments.join("/"))
    } else {
        segments.join("/")
    };

    let mut next = || leaves.next().unwrap_or_default().to_string();
    PathParts {
        root,
        database: next(),
        document: next(),
        filename: next(),
    }
}

/// Returns the explicit root prefix (everything before `//`) and the
/// remainder of the path. Without a boundary the root is empty.
pub fn split_root(path: &str) -> (&str, &str) {
    match path.split_once(ROOT_BOUNDARY) {
        Some((root, rest)) => (root, rest),
        None => ("", path),
    }
}
