use clap::Parser;
use quantscript::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
