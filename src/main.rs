mod cell;
mod cmd;
mod condition;
mod config;
mod errors;
mod graph;
mod postload;
mod router;
mod scheduler;
mod schema;
mod store;
mod tsv;
mod validate;

use clap::Parser;
use cmd::Cli;

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = cmd::run(cli) {
        eprintln!("{e:#}");
        std::process::exit(errors::exit_code_for(&e));
    }
}
