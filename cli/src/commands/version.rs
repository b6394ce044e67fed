//! `cnab-oci version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("cnab-oci version {}", cnab_oci_core::VERSION);
    Ok(())
}
