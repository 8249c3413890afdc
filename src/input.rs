//! Request bodies supplied with `--data` or `--data-file`.
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{CliError, CliResult};

/// Reads stdin when given as the data file.
pub const STDIN_MARKER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    bytes: Vec<u8>,
}

impl DocumentInput {
    /// Loads inline data or the contents of `data_file`. Returns `None` when
    /// neither is given.
    pub fn load(data: Option<&str>, data_file: Option<&Path>) -> CliResult<Option<Self>> {
        if let Some(data) = data {
            return Ok(Some(Self::from_bytes(data.as_bytes().to_vec())));
        }
        let Some(path) = data_file else {
            return Ok(None);
        };
        if path == Path::new(STDIN_MARKER) {
            debug!("Reading request body from stdin");
            return Self::from_reader(io::stdin().lock()).map(Some);
        }
        debug!("Reading request body from {}", path.display());
        let bytes = fs::read(path).map_err(|source| CliError::NoInput {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(Self::from_bytes(bytes)))
    }

    pub fn from_reader(mut reader: impl Read) -> CliResult<Self> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| CliError::NoInput {
                path: STDIN_MARKER.to_string(),
                source,
            })?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        DocumentInput { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parses the input as JSON.
    pub fn json(&self) -> CliResult<Value> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    /// The input as text with a trailing newline removed.
    pub fn text(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        text.strip_suffix('\n')
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .unwrap_or(&*text)
            .to_string()
    }
}
