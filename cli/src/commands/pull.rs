//! `cnab-oci pull` command.

use clap::Args;
use cnab_oci_core::ImageReference;
use cnab_oci_remotes::Puller;

use super::RegistryArgs;
use crate::output;

#[derive(Args)]
pub struct PullArgs {
    /// Bundle reference (e.g., "my.registry/namespace/my-app:0.1.0")
    pub reference: String,

    /// Output file, or "-" for standard output
    #[arg(short, long, default_value = "pulled.json")]
    pub output: String,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

pub async fn execute(args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.reference)?;
    let config = args.registry.config()?;

    let puller = Puller::new(super::registry(&config)).with_context(super::context(&config));
    let (bundle, relocation_map) = puller.pull(&reference).await?;

    output::write_bundle(&args.output, &bundle)?;
    args.registry.emit_relocation_map(&relocation_map)?;
    Ok(())
}
