//! serverflow command-line entry point.
//!
//! Binary name: `sflow`
//!
//! Parses CLI arguments, sets up tracing for the requested verbosity, then
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = serverflow_observe::init_tracing(cli.log_directive(), cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = match cli.command {
        Commands::Validate { path } => cli::validate::handle_validate(&path, cli.json),
        Commands::Run {
            file,
            input,
            config,
        } => cli::run::handle_run(&file, &input, config, cli.json).await,
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "sflow", &mut std::io::stdout());
            Ok(())
        }
    };

    serverflow_observe::shutdown_tracing();
    result
}
