//! Convoy - declarative service orchestrator
//!
//! Usage:
//!   convoy serve --config convoy.toml            # Run the enforcement loop
//!   convoy serve --config convoy.toml --once     # Run a single pass
//!   convoy policy apply --user 1 policy.toml     # Submit policy objects
//!   convoy policy show --format json             # Print the latest policy
//!   convoy status                                # Show the latest revision and endpoints

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_core::config::{ServerConfig, parse_server_config};
use convoy_core::context::AppContext;
use convoy_core::enforcer::Enforcer;
use convoy_core::lang::{ObjectKey, PolicyObject, parse_policy_file};
use convoy_core::status::collect_status;
use convoy_core::store::Store;
use convoy_core::types::Generation;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "Declarative service orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Server configuration file
    ///
    /// Without it the store lives in the user state directory and no users
    /// or secrets are loaded.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enforcement loop until interrupted
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Run one enforcement pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Manage the policy
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Show the latest revision and deployed endpoints
    Status {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Add or replace policy objects from TOML files
    Apply {
        #[command(flatten)]
        config: ConfigArgs,

        /// ID of the user authoring the change
        #[arg(long, short)]
        user: String,

        /// Objects to delete, as namespace/kind/name
        #[arg(long = "delete", value_name = "KEY")]
        delete: Vec<ObjectKey>,

        /// Policy files
        files: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Print a policy generation
    Show {
        #[command(flatten)]
        config: ConfigArgs,

        /// Generation to show (latest when omitted)
        #[arg(long)]
        generation: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoy=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, once } => run_serve(&config, once).await,
        Commands::Policy(PolicyCommands::Apply {
            config,
            user,
            delete,
            files,
            format,
        }) => run_policy_apply(&config, &user, delete, &files, format).await,
        Commands::Policy(PolicyCommands::Show {
            config,
            generation,
            format,
        }) => run_policy_show(&config, generation.map(Generation), format),
        Commands::Status { config, format } => run_status(&config, format),
    }
}

fn load_config(args: &ConfigArgs) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => parse_server_config(path)?,
        None => ServerConfig::default(),
    };
    if config.store.path.is_none() {
        config.store.path = Some(ServerConfig::default_store_path()?);
    }
    Ok(config)
}

fn load_context(args: &ConfigArgs) -> Result<(ServerConfig, AppContext)> {
    let config = load_config(args)?;
    let ctx = AppContext::from_config(&config)?;
    Ok((config, ctx))
}

async fn run_serve(args: &ConfigArgs, once: bool) -> Result<()> {
    let (config, ctx) = load_context(args)?;
    let enforcer = Enforcer::new(ctx);

    if once {
        let outcome = enforcer.enforce().await?;
        match outcome.revision {
            Some(revision) => println!(
                "Revision {} (policy generation {}): {}, {} failed",
                revision, outcome.policy_generation, outcome.summary, outcome.failed
            ),
            None => println!(
                "Policy generation {}: no changes",
                outcome.policy_generation
            ),
        }
        return Ok(());
    }

    if config.enforcer.disabled {
        info!("Enforcer disabled in configuration, nothing to do");
        return Ok(());
    }

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    };
    enforcer.run(config.enforcer.interval(), shutdown).await;
    Ok(())
}

fn read_objects(files: &[PathBuf]) -> Result<Vec<PolicyObject>> {
    let mut objects = Vec::new();
    for file in files {
        objects.extend(parse_policy_file(file)?);
    }
    Ok(objects)
}

async fn run_policy_apply(
    args: &ConfigArgs,
    user: &str,
    delete: Vec<ObjectKey>,
    files: &[PathBuf],
    format: OutputFormat,
) -> Result<()> {
    let objects = read_objects(files)?;
    if objects.is_empty() && delete.is_empty() {
        anyhow::bail!("Nothing to apply: pass policy files or --delete keys");
    }

    let (_, ctx) = load_context(args)?;
    let result = Enforcer::new(ctx)
        .update_policy(objects, delete, user)
        .await
        .context("Policy update rejected")?;

    match format {
        OutputFormat::Table => {
            if result.changed {
                println!("Policy generation {}", result.policy_generation);
            } else {
                println!("Policy unchanged (generation {})", result.policy_generation);
            }
            if result.actions.is_empty() {
                println!("No pending actions");
            } else {
                println!("Pending actions:");
                for action in &result.actions {
                    println!("  {}", action);
                }
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "changed": result.changed,
                "policy_generation": result.policy_generation,
                "actions": result.actions,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_policy_show(
    args: &ConfigArgs,
    generation: Option<Generation>,
    format: OutputFormat,
) -> Result<()> {
    let (_, ctx) = load_context(args)?;
    let (policy, generation) = ctx.store().get_policy(generation)?;

    match format {
        OutputFormat::Table => {
            println!("Policy generation {}", generation);
            let objects = policy.objects();
            if objects.is_empty() {
                println!("  (empty)");
            }
            for object in objects {
                println!("  {}", object.key());
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "generation": generation,
                "policy": policy,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_status(args: &ConfigArgs, format: OutputFormat) -> Result<()> {
    let (config, ctx) = load_context(args)?;
    let status = collect_status(&ctx)?;

    match format {
        OutputFormat::Table => {
            print_store_location(config.store.path.as_deref());
            println!("Policy generation {}", status.policy_generation);
            match &status.revision {
                Some(revision) => {
                    println!(
                        "Revision {}{} for policy generation {}: {:?} ({}/{} actions)",
                        revision.generation,
                        retry_suffix(revision.attempts),
                        revision.policy_generation,
                        revision.status,
                        revision.progress.current,
                        revision.progress.total
                    );
                    for error in &revision.errors {
                        println!("  ! {}", error);
                    }
                }
                None => println!("No revisions yet"),
            }
            println!(
                "{} component instances, {} dependencies resolved, {} issues",
                status.summary.instances, status.summary.dependencies, status.summary.issues
            );
            for entry in &status.endpoints {
                if let Some(error) = &entry.error {
                    println!("  {}: ! {}", entry.instance, error);
                }
                for (name, url) in &entry.endpoints {
                    println!("  {} {}: {}", entry.instance, name, url);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

fn retry_suffix(attempts: u32) -> String {
    if attempts > 1 {
        format!(" (attempt {})", attempts)
    } else {
        String::new()
    }
}

fn print_store_location(path: Option<&Path>) {
    match path {
        Some(path) => println!("Store: {}", path.display()),
        None => println!("Store: in memory"),
    }
}
