//! Request options gathered from the DSN query string and the command line.
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CliError, CliResult};

/// A single option value. Options are forwarded to the server as query
/// parameters, so booleans render as `true`/`false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Str(String),
    Bool(bool),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Str(s) => write!(f, "{s}"),
            OptionValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Options from the command line, before they are merged with those from
/// the DSN.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub strings: Vec<(String, String)>,
    pub bools: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: BTreeMap<String, OptionValue>,
}

impl Options {
    /// Builds the option set from, in order, DSN query parameters, string
    /// options and boolean options. The first source to set a key wins.
    /// Within a single source a repeated key keeps its last value.
    pub fn collect(query: BTreeMap<String, String>, cli: &CliOptions) -> CliResult<Self> {
        let mut options = Options::default();
        for (key, value) in query {
            options.insert_if_absent(key, OptionValue::Str(value));
        }
        for (key, value) in last_wins(&cli.strings) {
            options.insert_if_absent(key, OptionValue::Str(value));
        }
        for (key, value) in last_wins(&cli.bools) {
            if !options.values.contains_key(&key) {
                let parsed = parse_bool(&value)?;
                options.values.insert(key, OptionValue::Bool(parsed));
            }
        }
        Ok(options)
    }

    fn insert_if_absent(&mut self, key: String, value: OptionValue) {
        self.values.entry(key).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(OptionValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Renders every option as a query parameter pair.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

fn last_wins(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    pairs.iter().cloned().collect()
}

fn parse_bool(value: &str) -> CliResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "t" => Ok(true),
        "false" | "f" => Ok(false),
        _ => Err(CliError::usage(format!("invalid boolean value: {value}"))),
    }
}

/// Parses a `key=value` command line argument.
pub fn parse_key_value(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {arg:?}"))
}
