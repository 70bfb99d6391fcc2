use anyhow::Result;
use clap::Parser;
use jarvis::cli;
use jarvis::model::RunStatus;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "jarvis=debug,warn",
        _ => "jarvis=trace,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    match cli::run(args).await? {
        // A failed run already printed its reason; only the exit code is left.
        RunStatus::Failed => std::process::exit(1),
        RunStatus::Completed | RunStatus::Empty => Ok(()),
    }
}
