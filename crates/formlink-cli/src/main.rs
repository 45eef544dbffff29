//! formlink CLI
//!
//! Finds the introspection bridge inside a running desktop application and
//! drives its forms. Results are printed as JSON on stdout, logs go to stderr.
//!
//! Usage from workspace root:
//!   cargo run --bin formlink -- --target MyApp.exe discover
//!   cargo run --bin formlink -- --target 4242 controls --all
//!   cargo run --bin formlink -- --target 4242 resolve "id:btnSave" --match first
//!   cargo run --bin formlink -- --target 4242 resolve "text:Save && type:Button" --global
//!   cargo run --bin formlink -- --target 4242 dialog --all
//!   cargo run --bin formlink -- --target 4242 --config formlink.yaml batch steps.yaml

use crate::cli::Cli;

mod cli;
mod command;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();
    utils::init_logging();
    command::run(cli).await
}
