pub mod bins;
pub mod camera;
pub mod cli;
pub mod commands;
pub mod db;
pub mod error;
pub mod inference;
pub mod insights;
pub mod models;
pub mod scanner;
pub mod settings;
pub mod store;
pub mod utils;

use clap::Parser;

pub use error::{ScanError, ScanResult};

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(cli::execute(cli)) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
