//! acsengine CLI - drive cluster resources from a local state file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use acs_cloud::StaticTokenProvider;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use acsengine::lifecycle::read_cluster;
use acsengine::subscription::default_profile_path;
use acsengine::{AzureCliProfile, ProviderContext, ProviderSettings, ResourceData, Subscription};

/// acs-engine cluster provider.
#[derive(Parser)]
#[command(name = "acsengine")]
#[command(about = "Reconcile and upgrade acs-engine Kubernetes clusters")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subscription to operate in (defaults to the Azure CLI default)
    #[arg(long, env = "ARM_SUBSCRIPTION_ID", global = true)]
    subscription_id: Option<String>,

    /// Azure CLI profile (defaults to $AZURE_CONFIG_DIR or ~/.azure)
    #[arg(long, global = true)]
    azure_profile: Option<PathBuf>,

    /// Bearer token for Azure Resource Manager
    #[arg(long, env = "ARM_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Bearer token for Key Vault
    #[arg(long, env = "ARM_VAULT_TOKEN", hide_env_values = true, global = true)]
    vault_token: Option<String>,

    /// Resource Manager endpoint override
    #[arg(long, env = "ARM_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Upper bound for upgrading a single node, in seconds
    #[arg(long, env = "ACSENGINE_STEP_TIMEOUT_SECS", default_value = "1200", global = true)]
    step_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the subscription that would be used
    Subscription,

    /// Create the cluster, or update it if it already exists
    Apply {
        /// Resource state file
        #[arg(long, default_value = "cluster.json")]
        state: PathBuf,
    },

    /// Refresh the state file from the stored cluster specification
    Refresh {
        /// Resource state file
        #[arg(long, default_value = "cluster.json")]
        state: PathBuf,
    },

    /// Upgrade the cluster to a Kubernetes version
    Upgrade {
        /// Resource state file
        #[arg(long, default_value = "cluster.json")]
        state: PathBuf,

        /// Target Kubernetes version
        #[arg(long)]
        version: String,
    },

    /// Delete the cluster's resource group
    Destroy {
        /// Resource state file
        #[arg(long, default_value = "cluster.json")]
        state: PathBuf,
    },
}

fn load_state(path: &Path) -> Result<ResourceData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file {}", path.display()))
}

fn save_state(path: &Path, d: &ResourceData) -> Result<()> {
    let content = serde_json::to_string_pretty(d).context("Failed to serialize state")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write state file {}", path.display()))
}

fn resolve_subscription(cli: &Cli) -> Result<Subscription> {
    let path = match &cli.azure_profile {
        Some(path) => path.clone(),
        None => default_profile_path()?,
    };

    match AzureCliProfile::load(&path) {
        Ok(profile) => Ok(profile.resolve_subscription(cli.subscription_id.as_deref())?),
        Err(e) => match cli.subscription_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                warn!(error = %e, "Azure CLI profile unavailable, using explicit subscription");
                Ok(Subscription {
                    id: id.to_string(),
                    ..Subscription::default()
                })
            }
            None => Err(e).context("No subscription given and no Azure CLI profile found"),
        },
    }
}

fn provider_context(cli: &Cli) -> Result<ProviderContext> {
    let subscription = resolve_subscription(cli)?;
    let token = cli
        .access_token
        .clone()
        .context("An ARM access token is required (--access-token or ARM_ACCESS_TOKEN)")?;
    let tokens = Arc::new(StaticTokenProvider::new(token, cli.vault_token.clone()));

    let settings = ProviderSettings {
        step_timeout: Duration::from_secs(cli.step_timeout_secs),
        endpoint: cli.endpoint.clone(),
        ..ProviderSettings::default()
    };

    Ok(ProviderContext::new(subscription, tokens, settings)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("acsengine=debug,acs_cloud=debug,info")
    } else {
        EnvFilter::new("acsengine=info,acs_cloud=info,warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match &cli.command {
        Commands::Subscription => {
            let subscription = resolve_subscription(&cli)?;
            println!("{}", serde_json::to_string_pretty(&subscription)?);
        }
        Commands::Apply { state } => {
            let mut d = load_state(state)?;
            let lifecycle = provider_context(&cli)?.lifecycle();

            let result = if d.id().is_empty() {
                lifecycle.create_cluster(&mut d).await.map(|()| None)
            } else {
                lifecycle.update_cluster(&mut d).await
            };
            save_state(state, &d)?;

            if let Some(report) = result.context("Apply failed")? {
                info!(
                    version = %report.target_version,
                    nodes = report.nodes_upgraded,
                    "Upgraded during apply"
                );
            }
        }
        Commands::Refresh { state } => {
            let mut d = load_state(state)?;
            read_cluster(&mut d)?;
            save_state(state, &d)?;
        }
        Commands::Upgrade { state, version } => {
            let mut d = load_state(state)?;
            let orchestrator = provider_context(&cli)?.orchestrator();

            let result = orchestrator.run(&mut d, version).await;
            save_state(state, &d)?;

            let report = result.context("Upgrade failed")?;
            println!(
                "{} upgraded to {}: control plane {}, pools {:?}, {} nodes",
                report.cluster,
                report.target_version,
                if report.control_plane_upgraded { "upgraded" } else { "unchanged" },
                report.upgraded_pools,
                report.nodes_upgraded
            );
        }
        Commands::Destroy { state } => {
            let mut d = load_state(state)?;
            provider_context(&cli)?
                .lifecycle()
                .delete_cluster(&mut d)
                .await
                .context("Destroy failed")?;
            save_state(state, &d)?;
        }
    }

    Ok(())
}
