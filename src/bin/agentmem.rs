//! `agentmem` — CLI entry point (§6).

use agentmem::cli::{self, Cli};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let code = cli::run(cli);
    std::process::exit(code);
}
