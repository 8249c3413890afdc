use clap::Parser;

use couchctl::app;
use couchctl::cli::Args;
use couchctl::error::exit_code;
use couchctl::resolver::PhasedError;

fn report(failure: &PhasedError) {
    eprintln!("Error: {}", failure.error);
    if failure.wants_usage_hint() {
        eprintln!("Run 'couchctl --help' for usage.");
    }
}

/// Main async workflow with pre-parsed arguments
async fn async_main_with_args(args: Args) -> Result<(), PhasedError> {
    let (config, _log_guard) = app::load_config(&args)?;
    app::run(&config, &args).await
}

fn main() {
    let args = Args::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            std::process::exit(exit_code::IO);
        }
    };
    let result = runtime.block_on(async_main_with_args(args));
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));
    if let Err(failure) = result {
        report(&failure);
        std::process::exit(failure.exit_code());
    }
}
