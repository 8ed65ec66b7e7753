#![forbid(unsafe_code)]

//! dch: driver compatibility harness CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        if !matches!(e, cli_app::CliError::Regressions(_)) {
            eprintln!("dch: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
