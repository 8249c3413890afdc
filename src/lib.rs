pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod copy;
pub mod dsn;
pub mod error;
pub mod input;
pub mod logging;
pub mod operation;
pub mod options;
pub mod password_sanitizer;
pub mod path_split;
pub mod reserved;
pub mod resolver;

pub use cli::Args;
pub use config::Config;
pub use context::Context;
pub use dsn::{DsnError, parse_dsn};
pub use error::{CliError, CliResult};
pub use resolver::{Phase, PhasedError, Resolved, Target};
