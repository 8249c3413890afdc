use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::client::Timeouts;
use crate::operation::Verb;
use crate::options::{CliOptions, parse_key_value};
use crate::password_sanitizer::sanitize_dsn;

/// couchctl - command-line administration for CouchDB servers
#[derive(Parser, Clone)]
#[command(name = "couchctl")]
#[command(version, long_about = None)]
#[command(about = "Command-line administration client for CouchDB servers")]
pub struct Args {
    /// Path to the config file [default: ~/.config/couchctl/config.toml]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Default DSN, used as the current context
    #[arg(long, global = true, env = "COUCHCTL_DSN", value_name = "DSN", hide_env_values = true)]
    pub default_dsn: Option<String>,

    /// Request option, sent as a query parameter (repeatable)
    #[arg(short = 'O', long = "option", global = true, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,

    /// Boolean request option: true, t, false or f (repeatable)
    #[arg(short = 'B', long = "option-bool", global = true, value_name = "KEY=BOOL", value_parser = parse_key_value)]
    pub bool_options: Vec<(String, String)>,

    /// Timeout for the whole request, e.g. 30, 1.5, 150ms, 1m30s
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Timeout for establishing the connection
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch a server, database, document, attachment, config or security object
    Get(ResourceArgs),
    /// Create or replace a database, document, attachment, config value or security object
    Put(WriteArgs),
    /// Create a document, or run compaction, view cleanup, purge, replication or cluster setup
    Post(WriteArgs),
    /// Delete a database, document, attachment or config value
    Delete(ResourceArgs),
    /// Check that the server is up
    Ping(ResourceArgs),
    /// Show the server version, database info, or document and attachment metadata
    #[command(visible_alias = "descr")]
    Describe(ResourceArgs),
    /// Purge document revisions
    Purge(PurgeArgs),
    /// Copy a document, within a database or to another database or server
    Copy(CopyArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ResourceArgs {
    /// Target resource: a full URL, or a database/document relative to the current context
    #[arg(value_name = "DSN")]
    pub dsn: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WriteArgs {
    /// Target resource: a full URL, or a database/document relative to the current context
    #[arg(value_name = "DSN")]
    pub dsn: Option<String>,

    /// Request body
    #[arg(short = 'd', long, conflicts_with = "data_file")]
    pub data: Option<String>,

    /// Read the request body from a file, or `-` for stdin
    #[arg(short = 'D', long, value_name = "PATH")]
    pub data_file: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub write: WriteArgs,

    /// Revisions of the document in the DSN to purge, comma-separated
    #[arg(short = 'R', long, value_delimiter = ',', value_name = "REV")]
    pub revs: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CopyArgs {
    /// Source document
    #[arg(value_name = "SOURCE")]
    pub dsn: Option<String>,

    /// Target document
    #[arg(value_name = "TARGET")]
    pub target_dsn: Option<String>,

    /// Target document, when the source comes from the current context
    #[arg(short = 't', long, value_name = "DSN")]
    pub target: Option<String>,

    /// Current revision of the target document, also read from `?rev=` on the target
    #[arg(short = 'R', long, value_name = "REV")]
    pub target_rev: Option<String>,
}

impl CopyArgs {
    /// The `--target` flag, else the second positional argument.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().or(self.target_dsn.as_deref())
    }
}

impl Command {
    /// The single-request verb, or `None` for `copy`.
    pub fn verb(&self) -> Option<Verb> {
        let verb = match self {
            Command::Get(_) => Verb::Get,
            Command::Put(_) => Verb::Put,
            Command::Post(_) => Verb::Post,
            Command::Delete(_) => Verb::Delete,
            Command::Ping(_) => Verb::Ping,
            Command::Describe(_) => Verb::Describe,
            Command::Purge(_) => Verb::Purge,
            Command::Copy(_) => return None,
        };
        Some(verb)
    }

    pub fn dsn(&self) -> Option<&str> {
        match self {
            Command::Get(args)
            | Command::Delete(args)
            | Command::Ping(args)
            | Command::Describe(args) => args.dsn.as_deref(),
            Command::Put(args) | Command::Post(args) => args.dsn.as_deref(),
            Command::Purge(args) => args.write.dsn.as_deref(),
            Command::Copy(args) => args.dsn.as_deref(),
        }
    }

    pub fn write_args(&self) -> Option<&WriteArgs> {
        match self {
            Command::Put(args) | Command::Post(args) => Some(args),
            Command::Purge(args) => Some(&args.write),
            _ => None,
        }
    }

    /// Revisions given with `purge --revs`.
    pub fn revs(&self) -> &[String] {
        match self {
            Command::Purge(args) => args.revs.as_slice(),
            _ => &[],
        }
    }
}

impl Args {
    pub fn cli_options(&self) -> CliOptions {
        CliOptions {
            strings: self.options.clone(),
            bools: self.bool_options.clone(),
        }
    }

    fn copy_target(&self) -> Option<&str> {
        match &self.command {
            Command::Copy(copy) => copy.target(),
            _ => None,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            request: self.request_timeout,
        }
    }
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("config", &self.config)
            .field("debug", &self.debug)
            .field(
                "default_dsn",
                &self.default_dsn.as_ref().map(|dsn| sanitize_dsn(dsn)),
            )
            .field("options", &self.options)
            .field("bool_options", &self.bool_options)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("verb", &self.command.verb())
            .field("dsn", &self.command.dsn().map(sanitize_dsn))
            .field("target", &self.copy_target().map(sanitize_dsn))
            .finish()
    }
}

const NANOS_PER_SECOND: f64 = 1e9;

fn duration_from(value: f64, nanos_per_unit: f64) -> Option<Duration> {
    let nanos = (value * nanos_per_unit).round();
    (nanos.is_finite() && nanos >= 0.0 && nanos <= u64::MAX as f64)
        .then(|| Duration::from_nanos(nanos as u64))
}

/// Parses a timeout: a plain number of seconds (`30`, `1.5`) or a sequence
/// of number and unit pairs (`150ms`, `2s`, `1m30s`, `1h`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.starts_with('-') {
        return Err(format!("timeout must not be negative: {input}"));
    }
    let invalid = || format!("invalid timeout {input:?}: expected e.g. 30, 150ms, 2s, 1m30s");
    if input.is_empty() {
        return Err(invalid());
    }
    if let Ok(seconds) = input.parse::<f64>() {
        return duration_from(seconds, NANOS_PER_SECOND).ok_or_else(invalid);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_end);
        let value: f64 = number.parse().map_err(|_| invalid())?;
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let nanos_per_unit = match unit {
            "ms" => NANOS_PER_SECOND / 1000.0,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_SECOND * 60.0,
            "h" => NANOS_PER_SECOND * 3600.0,
            _ => return Err(invalid()),
        };
        total += duration_from(value, nanos_per_unit).ok_or_else(invalid)?;
        rest = tail;
    }
    Ok(total)
}
