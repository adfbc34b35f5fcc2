//! KeepVault CLI - Command line interface for the encrypted data vault.
//!
//! This tool drives the same host API a desktop front end would use:
//! creating and unlocking the vault, importing and exporting its document,
//! managing backups and moving the storage location.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use keepvault_common::{Document, Password};
use keepvault_storage::RootSource;
use keepvault_vault::{ServiceOptions, VaultService};

#[derive(Parser)]
#[command(name = "keepvault")]
#[command(about = "KeepVault - Encrypted single-user data vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this storage root instead of resolving one.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty vault.
    Init,

    /// Unlock the vault and print a summary.
    Show,

    /// Replace the vault document with a JSON file.
    Import {
        /// JSON document to import.
        file: PathBuf,
    },

    /// Print the decrypted document as JSON.
    Export {
        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Change the vault password.
    Passwd,

    /// Manage backups.
    Backups {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Show or change the storage location.
    Location {
        #[command(subcommand)]
        command: LocationCommands,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List backups, newest first.
    List,

    /// Replace the vault with a backup.
    Restore {
        /// Backup name as shown by `backups list`.
        id: String,
    },

    /// Delete old backups, always keeping the newest.
    Prune {
        /// Retention window in days.
        #[arg(short, long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum LocationCommands {
    /// Print the active storage root.
    Show,

    /// Copy the vault to a directory and use it from now on.
    Set {
        /// Existing directory to move the vault to.
        dir: PathBuf,
    },

    /// Explain how the storage root is chosen.
    Resolve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let service = open_service(cli.root.as_deref()).await?;

    let result = match cli.command {
        Commands::Init => cmd_init(&service).await,
        Commands::Show => cmd_show(&service).await,
        Commands::Import { file } => cmd_import(&service, &file).await,
        Commands::Export { output } => cmd_export(&service, output.as_deref()).await,
        Commands::Passwd => cmd_passwd(&service).await,

        Commands::Backups { command } => match command {
            BackupCommands::List => cmd_backups_list(&service).await,
            BackupCommands::Restore { id } => cmd_backups_restore(&service, &id).await,
            BackupCommands::Prune { days } => cmd_backups_prune(&service, days).await,
        },

        Commands::Location { command } => match command {
            LocationCommands::Show => cmd_location_show(&service).await,
            LocationCommands::Set { dir } => cmd_location_set(&service, &dir).await,
            LocationCommands::Resolve => cmd_location_resolve(&service).await,
        },
    };

    service.shutdown().await.context("Failed to close vault")?;
    result
}

async fn open_service(root: Option<&Path>) -> Result<VaultService> {
    match root {
        Some(root) => {
            let service = VaultService::new(ServiceOptions::default())
                .context("Failed to start vault service")?;
            service
                .initialize(root)
                .await
                .with_context(|| format!("Failed to use storage root {}", root.display()))?;
            Ok(service)
        }
        None => {
            let (service, _, resolved) = VaultService::open(ServiceOptions::default())
                .await
                .context("Failed to resolve storage location")?;
            for warning in &resolved.warnings {
                eprintln!("warning: {}", warning);
            }
            Ok(service)
        }
    }
}

fn prompt_password(prompt: &str) -> Result<Password> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Password::new(password))
}

fn prompt_new_password() -> Result<Password> {
    let password = prompt_password("New password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if !password.matches(&confirm) {
        anyhow::bail!("Passwords do not match");
    }
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

async fn unlock(service: &VaultService) -> Result<(Password, Document)> {
    let password = prompt_password("Password: ")?;
    let document = service
        .unlock(password.clone())
        .await
        .context("Failed to unlock vault")?;
    Ok((password, document))
}

async fn cmd_init(service: &VaultService) -> Result<()> {
    let password = prompt_new_password()?;

    service
        .create_initial(password)
        .await
        .context("Failed to create vault")?;

    let location = service.get_data_location().await?;
    println!("Vault created successfully!");
    println!("  Location: {}", location.display());

    Ok(())
}

async fn cmd_show(service: &VaultService) -> Result<()> {
    let (_, document) = unlock(service).await?;

    println!("Sites: {}", document.sites.len());
    for site in &document.sites {
        let status = if site.enabled { "" } else { " (disabled)" };
        println!(
            "  [{}] {}{} - {} interventions, {} contacts",
            site.id,
            site.name,
            status,
            site.interventions.len(),
            site.contacts.len()
        );
    }

    let settings = &document.settings;
    println!("Settings:");
    println!("  Auto-lock: {} min", settings.auto_lock_minutes);
    println!("  Auto-backup: {}", settings.auto_backup);
    println!("  Backup retention: {} days", settings.backup_keep_days);

    Ok(())
}

async fn cmd_import(service: &VaultService, file: &Path) -> Result<()> {
    info!("Importing document from {}", file.display());

    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document: Document =
        serde_json::from_slice(&content).context("File is not a valid vault document")?;

    let (password, _) = unlock(service).await?;
    let sites = document.sites.len();
    service
        .save(password, document)
        .await
        .context("Failed to save vault")?;

    println!("Imported {} sites", sites);
    Ok(())
}

async fn cmd_export(service: &VaultService, output: Option<&Path>) -> Result<()> {
    let (_, document) = unlock(service).await?;
    let json = serde_json::to_string_pretty(&document)?;

    match output {
        Some(path) => {
            tokio::fs::write(path, json.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

async fn cmd_passwd(service: &VaultService) -> Result<()> {
    let (old, _) = unlock(service).await?;
    let new = prompt_new_password()?;

    service
        .change_password(old, new)
        .await
        .context("Failed to change password")?;

    println!("Password changed successfully!");
    Ok(())
}

async fn cmd_backups_list(service: &VaultService) -> Result<()> {
    let backups = service.list_backups().await?;

    if backups.is_empty() {
        println!("No backups.");
    } else {
        for id in backups {
            let local = id.captured_at().with_timezone(&chrono::Local);
            println!("  {}  ({})", id, local.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    Ok(())
}

async fn cmd_backups_restore(service: &VaultService, id: &str) -> Result<()> {
    service
        .restore_backup(id)
        .await
        .with_context(|| format!("Failed to restore {}", id))?;

    println!("Restored {}", id);
    Ok(())
}

async fn cmd_backups_prune(service: &VaultService, days: u32) -> Result<()> {
    let removed = service.prune_backups(days).await?;
    println!("Removed {} backups older than {} days", removed.len(), days);
    Ok(())
}

async fn cmd_location_show(service: &VaultService) -> Result<()> {
    let location = service.get_data_location().await?;
    println!("{}", location.display());
    Ok(())
}

async fn cmd_location_set(service: &VaultService, dir: &Path) -> Result<()> {
    let new_root = service
        .set_data_location(dir)
        .await
        .context("Failed to change storage location")?;

    println!("Storage location changed to {}", new_root.display());
    println!("Files at the previous location were left in place.");
    Ok(())
}

async fn cmd_location_resolve(service: &VaultService) -> Result<()> {
    let resolved = service.resolve_root().await?;

    let source = match resolved.source {
        RootSource::Portable => "portable marker",
        RootSource::Configured => "configured location",
        RootSource::Default => "platform default",
    };
    println!("{} ({})", resolved.path.display(), source);
    for warning in &resolved.warnings {
        println!("  skipped: {}", warning);
    }

    Ok(())
}
