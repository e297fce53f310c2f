//! imgvault CLI Binary
//!
//! Command-line interface for imgvault libraries.

use anyhow::Context;
use clap::Parser;
use imgvault::logging::init_logging;
use imgvault::tooling::cli::{Cli, CliContext};
use std::process;

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context = CliContext::new(cli.library.clone(), cli.config.clone())
        .context("Failed to load configuration")?;

    let logging = cli.logging_config(&context.config().logging);
    init_logging(Some(&logging)).context("Failed to initialise logging")?;

    let output = context.execute(&cli.command)?;
    Ok(output)
}

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
