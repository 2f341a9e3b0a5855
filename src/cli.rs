//! CLI parsing and command execution
//!
//! This module handles command-line argument parsing and runs the configured
//! rotation and disablement entries.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, Disablement, Rotation, SecretSet};
use crate::context::RunContext;
use crate::disable::{DisablePolicy, DisablementEngine};
use crate::plugin::PluginRegistry;
use crate::plugins::builtin_registry;
use crate::rotation::{Destination, RotationEngine, SecretEntry};
use crate::secret::{CredentialInfo, DestinationRef};

#[derive(Parser)]
#[command(name = "keyrot")]
#[command(about = "Rotate cloud access keys, propagate them to secret stores and disable the old ones", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "KEYROT_CONFIG", default_value = "keyrot.toml")]
    pub config: PathBuf,

    /// Only log what would change
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Human-readable log output
    #[arg(long, global = true)]
    pub dev_mode: bool,

    /// Rotation period (overrides config file), e.g. "168h"
    #[arg(long, value_parser = parse_duration)]
    pub rotate_after: Option<Duration>,

    /// Disablement period (overrides config file), e.g. "48h"
    #[arg(long, value_parser = parse_duration)]
    pub disable_after: Option<Duration>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "keyrot.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file
    Check,

    /// Rotate every configured credential that is due
    Rotate,

    /// Disable superseded credentials
    Disable,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    // Init doesn't need an existing config
    if let Commands::Init { output } = &cli.command {
        Config::create_sample(output)
            .with_context(|| format!("Failed to create sample config at {:?}", output))?;
        info!("Sample configuration created at {:?}", output);
        return Ok(());
    }

    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    if let Some(rotate_after) = cli.rotate_after {
        config.rotate_after = rotate_after;
    }
    if let Some(disable_after) = cli.disable_after {
        config.disable_after = disable_after;
    }

    let problems = config.validate();
    for problem in &problems {
        warn!("config: {}", problem);
    }

    let registry = builtin_registry().with_options(config.plugins.clone());

    let ctx = RunContext::new();
    let cancel = ctx.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Check => {
            for client in config
                .rotations
                .iter()
                .map(|r| &r.client)
                .chain(config.disablements.iter().map(|d| &d.client))
                .chain(config.secret_sets.values().flat_map(|set| {
                    set.secrets
                        .iter()
                        .flat_map(|s| s.storages.iter().map(|st| &st.client))
                }))
            {
                if !registry.is_registered(client) {
                    bail!(
                        "Unknown plugin {:?}; available plugins: {}",
                        client,
                        registry.type_ids().join(", ")
                    );
                }
            }
            if !problems.is_empty() {
                bail!("{} configuration problem(s) found", problems.len());
            }
            println!(
                "Configuration OK: {} rotation(s), {} disablement(s), {} secret set(s)",
                config.rotations.len(),
                config.disablements.len(),
                config.secret_sets.len()
            );
        }

        Commands::Rotate => {
            let mut failures = 0;
            for (index, rotation) in config.rotations.iter().enumerate() {
                let engine = match rotation_engine(&ctx, &registry, &config, rotation, cli.dry_run).await {
                    Ok(engine) => engine,
                    Err(e) => {
                        error!(
                            rotation = index,
                            client = %rotation.client,
                            error = %format!("{:#}", e),
                            "unable to set up rotation"
                        );
                        failures += 1;
                        continue;
                    }
                };

                let report = engine.rotate_secrets(&ctx).await;
                info!(
                    client = %rotation.client,
                    secret_set = %rotation.secret_set,
                    rotated = report.rotated,
                    planned = report.planned,
                    not_due = report.not_due,
                    failed = report.failed,
                    saved = report.saved,
                    save_failed = report.save_failed,
                    "rotation finished"
                );
                if !report.is_clean() {
                    failures += 1;
                }
            }

            if failures > 0 {
                bail!("{} rotation(s) did not complete cleanly", failures);
            }
        }

        Commands::Disable => {
            let mut failures = 0;
            for (index, disablement) in config.disablements.iter().enumerate() {
                let result = match disablement_engine(&ctx, &registry, &config, disablement, cli.dry_run).await {
                    Ok(engine) => engine.disable_secrets(&ctx).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    error!(
                        disablement = index,
                        client = %disablement.client,
                        error = %format!("{:#}", e),
                        "disablement failed"
                    );
                    failures += 1;
                }
            }

            if failures > 0 {
                bail!("{} disablement(s) failed", failures);
            }
        }
    }

    Ok(())
}

async fn rotation_engine(
    ctx: &RunContext,
    registry: &PluginRegistry,
    config: &Config,
    rotation: &Rotation,
    dry_run: bool,
) -> Result<RotationEngine> {
    let set = config.secret_set(&rotation.secret_set)?;
    let client = registry.instance(ctx, &rotation.client).await?.rotation_source()?;
    let secrets = secret_entries(ctx, registry, set).await?;

    Ok(RotationEngine::new(client, rotation.rotate_after(config), dry_run, secrets)
        .force_on_missing_keys(rotation.force_on_missing_keys))
}

async fn disablement_engine(
    ctx: &RunContext,
    registry: &PluginRegistry,
    config: &Config,
    disablement: &Disablement,
    dry_run: bool,
) -> Result<DisablementEngine> {
    let set = config.secret_set(&disablement.secret_set)?;
    let client = registry
        .instance(ctx, &disablement.client)
        .await?
        .disablement_source()?;
    let policy = DisablePolicy {
        rotate_after: config.rotate_after,
        disable_after: disablement.disable_after(config),
        anchor: disablement.anchor,
    };
    let secrets = set
        .secrets
        .iter()
        .map(|s| CredentialInfo::new(s.secret.as_str()))
        .collect();

    Ok(DisablementEngine::new(client, policy, dry_run, secrets))
}

/// Resolves every storage of a secret set to its sink.
async fn secret_entries(
    ctx: &RunContext,
    registry: &PluginRegistry,
    set: &SecretSet,
) -> Result<Vec<SecretEntry>> {
    let mut entries = Vec::with_capacity(set.secrets.len());
    for secret in &set.secrets {
        let mut destinations = Vec::with_capacity(secret.storages.len());
        for storage in &secret.storages {
            let sink = registry
                .instance(ctx, &storage.client)
                .await
                .and_then(|instance| instance.storage_sink())
                .with_context(|| {
                    format!("storage {:?} of secret {:?}", storage.storage, secret.secret)
                })?;
            destinations.push(Destination {
                target: DestinationRef::new(storage.storage.as_str()),
                sink,
                remap: storage.keys.clone(),
            });
        }
        entries.push(SecretEntry {
            info: CredentialInfo::new(secret.secret.as_str()),
            destinations,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "keyrot",
            "--config",
            "custom.toml",
            "--rotate-after",
            "72h",
            "rotate",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.rotate_after, Some(Duration::from_secs(72 * 3600)));
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Commands::Rotate));
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["keyrot", "--disable-after", "soon", "disable"]).is_err());
    }

    #[tokio::test]
    async fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("keyrot.toml");
        let cli = Cli::try_parse_from(["keyrot", "init", "--output", output.to_str().unwrap()]).unwrap();

        execute(cli).await.unwrap();

        let config = Config::from_file(&output).unwrap();
        assert!(config.validate().is_empty());
        assert_eq!(config.rotations.len(), 1);
    }

    #[tokio::test]
    async fn test_check_rejects_unknown_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyrot.toml");
        std::fs::write(
            &path,
            r#"
[secret_sets.ci]
[[secret_sets.ci.secrets]]
secret = "ci-deployer"

[[rotations]]
client = "gcp-iam"
secret_set = "ci"
"#,
        )
        .unwrap();
        let cli = Cli::try_parse_from(["keyrot", "--config", path.to_str().unwrap(), "check"]).unwrap();

        let err = execute(cli).await.unwrap_err();
        assert!(err.to_string().contains("gcp-iam"));
    }

    #[tokio::test]
    async fn test_rotate_reports_unknown_secret_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyrot.toml");
        std::fs::write(
            &path,
            r#"
[[rotations]]
client = "aws-iam"
secret_set = "missing"
"#,
        )
        .unwrap();
        let cli = Cli::try_parse_from(["keyrot", "--config", path.to_str().unwrap(), "rotate"]).unwrap();

        let err = execute(cli).await.unwrap_err();
        assert!(err.to_string().contains("1 rotation(s)"));
    }
}
