//! cnab-oci: push and pull CNAB bundles.

use clap::Parser;

use cnab_oci_cli::commands::{dispatch, Cli};
use cnab_oci_cli::logging;

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(e) = dispatch(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
