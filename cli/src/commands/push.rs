//! `cnab-oci push` command.

use std::path::PathBuf;

use clap::{ArgAction, Args};
use cnab_oci_core::{Bundle, ImageReference};
use cnab_oci_remotes::Pusher;

use super::RegistryArgs;

#[derive(Args)]
pub struct PushArgs {
    /// Bundle file (bundle.json)
    pub bundle: PathBuf,

    /// Target reference (e.g., "my.registry/namespace/my-app:0.1.0")
    #[arg(short = 't', long)]
    pub target: String,

    /// Retry with the compatible scheme if the registry rejects media types
    #[arg(
        long,
        default_value = "true",
        default_missing_value = "true",
        num_args = 0..=1,
        action = ArgAction::Set
    )]
    pub allow_fallbacks: bool,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

pub async fn execute(args: PushArgs) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read(&args.bundle)
        .map_err(|e| format!("Failed to read {}: {e}", args.bundle.display()))?;
    let bundle = Bundle::from_slice(&content)?;
    let target = ImageReference::parse(&args.target)?;

    let mut config = args.registry.config()?;
    config.allow_fallback = args.allow_fallbacks;

    let pusher = Pusher::new(super::registry(&config))
        .with_context(super::context(&config))
        .with_config(config);
    let result = pusher.push(&bundle, &target).await?;

    println!("Pushed successfully, with digest \"{}\"", result.descriptor.digest);
    args.registry.emit_relocation_map(&result.relocation_map)?;
    Ok(())
}
