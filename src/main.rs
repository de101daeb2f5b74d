use std::process::ExitCode;

use clap::Parser;
use sketchfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::echo_to_stderr(args.verbose);
    logger::init();

    cli::run(args)
}
