//! CLI command definitions and dispatch.

mod pull;
mod push;
mod version;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use cnab_oci_core::{RelocationMap, RemotesConfig};
use cnab_oci_remotes::{Context, OciRegistry, Registry, RegistryAuth};

use crate::output;

/// CNAB OCI - store CNAB bundles in OCI registries.
#[derive(Parser)]
#[command(name = "cnab-oci", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull a bundle from a registry
    Pull(pull::PullArgs),
    /// Push a bundle to a registry
    Push(push::PushArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Registry options shared by push and pull.
#[derive(Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Registries reached over plain HTTP (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub insecure_registries: Vec<String>,

    /// Abort the operation after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum number of concurrent registry requests
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Write the relocation map to this file as JSON
    #[arg(long)]
    pub relocation_map: Option<PathBuf>,
}

impl RegistryArgs {
    /// Environment configuration overridden by flags.
    pub(crate) fn config(&self) -> Result<RemotesConfig, Box<dyn std::error::Error>> {
        let mut config = RemotesConfig::from_env()?;
        config
            .insecure_registries
            .extend(self.insecure_registries.iter().cloned());
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        config.validate()?;
        tracing::debug!(config = ?config, "Registry configuration");
        Ok(config)
    }

    /// Persist the relocation map if requested, otherwise print it.
    pub(crate) fn emit_relocation_map(
        &self,
        map: &RelocationMap,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.relocation_map {
            Some(path) => output::write_json(path, map),
            None => {
                if !map.is_empty() {
                    eprintln!("{}", output::relocation_table(map));
                }
                Ok(())
            }
        }
    }
}

/// Registry client for the configured insecure registries.
pub(crate) fn registry(config: &RemotesConfig) -> Arc<dyn Registry> {
    Arc::new(OciRegistry::with_insecure(
        RegistryAuth::from_env(),
        config.insecure_registries.clone(),
    ))
}

/// Operation context bounded by the configured timeout.
pub(crate) fn context(config: &RemotesConfig) -> Context {
    let ctx = Context::background();
    match config.timeout_secs {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Pull(args) => pull::execute(args).await,
        Command::Push(args) => push::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pull_defaults() {
        let cli = Cli::try_parse_from(["cnab-oci", "pull", "my.registry/ns/app:0.1.0"]).unwrap();
        match cli.command {
            Command::Pull(args) => {
                assert_eq!(args.reference, "my.registry/ns/app:0.1.0");
                assert_eq!(args.output, "pulled.json");
                assert!(args.registry.insecure_registries.is_empty());
            }
            _ => panic!("expected pull"),
        }
    }

    #[test]
    fn test_parse_push() {
        let cli = Cli::try_parse_from([
            "cnab-oci",
            "push",
            "bundle.json",
            "-t",
            "my.registry/ns/app:0.1.0",
            "--insecure-registries",
            "localhost:5000,registry.local",
            "--allow-fallbacks",
            "false",
        ])
        .unwrap();
        match cli.command {
            Command::Push(args) => {
                assert_eq!(args.bundle, PathBuf::from("bundle.json"));
                assert_eq!(args.target, "my.registry/ns/app:0.1.0");
                assert!(!args.allow_fallbacks);
                assert_eq!(
                    args.registry.insecure_registries,
                    vec!["localhost:5000".to_string(), "registry.local".to_string()]
                );
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_push_requires_target() {
        assert!(Cli::try_parse_from(["cnab-oci", "push", "bundle.json"]).is_err());
    }

    #[test]
    fn test_push_allows_fallbacks_by_default() {
        let cli =
            Cli::try_parse_from(["cnab-oci", "push", "bundle.json", "-t", "app:1"]).unwrap();
        match cli.command {
            Command::Push(args) => assert!(args.allow_fallbacks),
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_bare_allow_fallbacks_flag() {
        let cli = Cli::try_parse_from([
            "cnab-oci",
            "push",
            "bundle.json",
            "--allow-fallbacks",
            "-t",
            "app:1",
        ])
        .unwrap();
        match cli.command {
            Command::Push(args) => assert!(args.allow_fallbacks),
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let args = RegistryArgs {
            insecure_registries: vec!["localhost:5000".to_string()],
            timeout: Some(30),
            concurrency: Some(8),
            relocation_map: None,
        };
        let config = args.config().unwrap();
        assert!(config.insecure_registries.contains(&"localhost:5000".to_string()));
        assert_eq!(config.timeout_secs, Some(30));
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let args = RegistryArgs {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(args.config().is_err());
    }
}
