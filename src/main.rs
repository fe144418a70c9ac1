use clap::Parser;
use pricevault::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
