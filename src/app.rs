//! Runs one command: resolve, plan, send, print.
use std::io::{self, Write};

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::cli::{Args, Command, CopyArgs};
use crate::client::{ApiResponse, ClientInfo, CouchApi, HttpClient, ResponseHead};
use crate::config::Config;
use crate::context::Context;
use crate::copy::{CopyPlan, target_body};
use crate::error::{CliError, CliResult};
use crate::input::DocumentInput;
use crate::logging::{self, LogGuard};
use crate::operation::{Operation, Output, Payload, Subject};
use crate::resolver::{Phase, PhasedError, Resolved};

fn resolving(error: CliError) -> PhasedError {
    PhasedError::new(Phase::Resolving, error)
}

/// Loads the configuration and starts logging. The returned guard must be
/// held until the process exits.
pub fn load_config(args: &Args) -> Result<(Config, LogGuard), PhasedError> {
    let config = Config::read(args.config.as_deref())
        .and_then(|config| config.with_default_dsn(args.default_dsn.as_deref()))
        .map_err(resolving)?;
    let guard = logging::init(&config.logging, args.debug);
    debug!("{args:?}");
    Ok((config, guard))
}

/// Resolves the command line into an operation without touching the
/// network.
pub fn prepare(config: &Config, args: &Args) -> CliResult<(Resolved, Operation)> {
    let verb = args
        .command
        .verb()
        .ok_or_else(|| CliError::usage("copy takes a source and a target"))?;
    let resolved = Resolved::resolve(config, args.command.dsn(), &args.cli_options())?;
    let input = match args.command.write_args() {
        Some(write) => DocumentInput::load(write.data.as_deref(), write.data_file.as_deref())?,
        None => None,
    };
    let payload = Payload {
        input,
        revs: args.command.revs().to_vec(),
    };
    let operation = Operation::plan(verb, &resolved, &payload)?;
    Ok((resolved, operation))
}

/// Resolves the source of a copy and plans the requests.
pub fn prepare_copy(
    config: &Config,
    args: &Args,
    copy: &CopyArgs,
) -> CliResult<(Resolved, CopyPlan)> {
    let resolved = Resolved::resolve(config, copy.dsn.as_deref(), &args.cli_options())?;
    let plan = CopyPlan::plan(&resolved, copy.target(), copy.target_rev.as_deref())?;
    Ok((resolved, plan))
}

/// Summary of a `HEAD` response.
fn description(subject: &Subject, head: &ResponseHead) -> Value {
    match subject {
        Subject::Document { id } => json!({
            "id": id,
            "rev": head.etag,
            "size": head.content_length,
        }),
        Subject::Attachment { filename } => json!({
            "filename": filename,
            "content_type": head.content_type,
            "digest": head.etag,
            "size": head.content_length,
        }),
    }
}

fn write_json(out: &mut dyn Write, value: &Value) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(out, "{text}")?;
    Ok(())
}

/// Sends the planned request and writes the response to `out`.
pub async fn execute(
    api: &dyn CouchApi,
    operation: Operation,
    out: &mut dyn Write,
) -> CliResult<()> {
    let output = operation.output;
    let response = api.send(operation.request).await?;
    match (output, response) {
        (Output::Status, _) => writeln!(out, "OK")?,
        (Output::Describe(subject), ApiResponse::Head(head)) => {
            write_json(out, &description(&subject, &head))?
        }
        (_, ApiResponse::Json(value)) => write_json(out, &value)?,
        (_, ApiResponse::Raw { bytes, .. }) => out.write_all(&bytes)?,
        (_, ApiResponse::Head(head)) => write_json(out, &serde_json::to_value(head)?)?,
    }
    out.flush()?;
    Ok(())
}

/// Runs a copy. `target` is only used when the copy is emulated.
pub async fn execute_copy(
    source: &dyn CouchApi,
    target: &dyn CouchApi,
    plan: CopyPlan,
    out: &mut dyn Write,
) -> CliResult<()> {
    let response = match plan {
        CopyPlan::Server(request) => source.send(request).await?,
        CopyPlan::Emulated { fetch, store, .. } => {
            let document = match source.send(fetch).await? {
                ApiResponse::Json(document) => document,
                _ => return Err(CliError::Protocol("expected a JSON document".to_string())),
            };
            target.send(store.with_body(target_body(document)?)).await?
        }
    };
    if let ApiResponse::Json(value) = response {
        write_json(out, &value)?;
    }
    out.flush()?;
    Ok(())
}

fn client_for(context: &Context, args: &Args) -> CliResult<HttpClient> {
    let info = ClientInfo::from_context(context)?;
    HttpClient::new(info, args.timeouts())
}

async fn run_copy(config: &Config, args: &Args, copy: &CopyArgs) -> Result<(), PhasedError> {
    let (resolved, plan) = prepare_copy(config, args, copy).map_err(resolving)?;
    let source = client_for(&resolved.context, args).map_err(resolving)?;
    let target = match &plan {
        CopyPlan::Emulated { target, .. } => Some(client_for(target, args).map_err(resolving)?),
        CopyPlan::Server(_) => None,
    };
    info!("Copying on {}", source.info().base_url);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute_copy(&source, target.as_ref().unwrap_or(&source), plan, &mut out)
        .await
        .map_err(|e| PhasedError::new(Phase::Executing, e))
}

pub async fn run(config: &Config, args: &Args) -> Result<(), PhasedError> {
    if let Command::Copy(copy) = &args.command {
        return run_copy(config, args, copy).await;
    }
    let (resolved, operation) = prepare(config, args).map_err(resolving)?;
    let client = client_for(&resolved.context, args).map_err(resolving)?;

    info!(
        "{} {} on {}",
        operation.request.method,
        operation.request.display_path(),
        client.info().base_url
    );
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&client, operation, &mut out)
        .await
        .map_err(|e| PhasedError::new(Phase::Executing, e))
}
