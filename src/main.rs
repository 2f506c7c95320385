use std::path::Path;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

use iceberg::cli::{self, Cli, Invocation};
use iceberg::discovery;
use iceberg::{ilog, ilog_error, Error};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            println!("{}", cli::usage());
            eprint!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    iceberg::log::init_with_debug(cli.debug);
    if iceberg::log::is_debug() {
        ilog!("ICEBERG starting (debug mode enabled)");
    }

    let invocation = match cli.into_invocation() {
        Ok(invocation) => invocation,
        Err(e) => return fail(e),
    };

    match invocation {
        Invocation::Discover(args) => match discovery::kernel::run(&args, Path::new(".")) {
            Ok(table) => {
                println!("{}", table.display());
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },
        Invocation::Analysis(config) => match cli::run_analysis(&config) {
            Ok(summary) => match serde_json::to_string_pretty(&summary) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e.into()),
            },
            Err(e) => fail(e),
        },
    }
}

fn fail(e: Error) -> ExitCode {
    ilog_error!("{}", e);
    if cli::is_usage_error(&e) {
        println!("{}", cli::usage());
    }
    eprintln!("Error: {}", e);
    ExitCode::FAILURE
}
