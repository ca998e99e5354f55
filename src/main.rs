// Upload Guard - Main Entry Point
//
// CLI interface for:
// - Serving the admin config API and upload check endpoint
// - Inspecting the persisted upload policy
// - Validating configuration files

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use uploadguard::config::Config;
use uploadguard::rate_limit::{store, PolicyDocument};
use uploadguard::{logging, server};

/// Upload Guard: admin-gated upload rate limiting
#[derive(Parser, Debug)]
#[command(name = "uploadguard")]
#[command(author = "Upload Guard Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Admin-gated upload rate limiting service", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to config file (default: XDG config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the persisted upload policy as JSON
    ShowPolicy {
        /// Policy file (default: value from config)
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Load and validate a config file
    CheckConfig {
        /// Path to config file (default: XDG config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Serve { config }) => {
            let config = load_config(config.as_deref())?;
            logging::init(&config.logging, args.verbose)?;
            info!("Upload Guard v{} starting...", env!("CARGO_PKG_VERSION"));
            server::serve(&config).await?;
        }
        Some(Commands::ShowPolicy { policy }) => {
            let path = match policy {
                Some(path) => path,
                None => PathBuf::from(Config::load()?.policy.path),
            };
            show_policy(&path)?;
        }
        Some(Commands::CheckConfig { config }) => {
            let path = config.unwrap_or_else(Config::config_path);
            let loaded = Config::load_from_path(&path)
                .with_context(|| format!("Invalid config at {}", path.display()))?;
            println!("Config OK: {}", path.display());
            println!("  listen: {}", loaded.listen_addr()?);
            println!("  policy: {}", loaded.policy.path);
            println!(
                "  admin password: {}",
                if loaded.admin.password.is_some() {
                    "configured"
                } else {
                    "not set (policy changes disabled)"
                }
            );
        }
        None => {
            println!("No command specified. Use \"uploadguard --help\" for usage.");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load(),
    }
}

/// Print the policy stored at `path`, or the defaults if nothing is stored
fn show_policy(path: &Path) -> Result<()> {
    let policy = store::load_persisted(path)
        .with_context(|| format!("Failed to read policy from {}", path.display()))?
        .unwrap_or_default();
    let document = PolicyDocument::from(policy);
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
