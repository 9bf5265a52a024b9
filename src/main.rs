use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cipherbook::cli::{
    handle_change_password, handle_list, handle_recover, handle_revoke, AccountArgs, ListArgs,
};
use cipherbook::config::{CipherbookPaths, Settings};

/// Log filter variable, checked before `RUST_LOG`
const LOG_ENV: &str = "CIPHERBOOK_LOG";

#[derive(Parser)]
#[command(
    name = "cipherbook",
    version,
    about = "Personal-finance client with client-side encryption",
    long_about = "cipherbook keeps every category, transaction, change-log entry and goal \
                  encrypted under a key derived from your password. The sync server only \
                  ever sees ciphertext, and changing your password re-encrypts every record."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the server URL and account name
    Init {
        /// Base URL of the sync server
        #[arg(short, long)]
        server: Option<String>,
        /// Account name
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show current configuration and paths
    Config,

    /// Decrypt and list the records of one kind
    #[command(alias = "ls")]
    List(ListArgs),

    /// Change your password and re-encrypt every record
    #[command(alias = "passwd")]
    ChangePassword(AccountArgs),

    /// Start a recovery session and check which records open with a password
    Recover(AccountArgs),

    /// Revoke your token on the server
    Revoke(AccountArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let paths = CipherbookPaths::new()?;
    let mut settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Commands::Init { server, user } => {
            if let Some(server) = server {
                settings.server_url = server;
            }
            if let Some(user) = user {
                settings.username = Some(user);
            }
            settings.validate()?;
            settings.save(&paths)?;
            println!("Saved configuration to {}", paths.settings_file().display());
        }
        Commands::Config => {
            println!("Configuration:");
            println!("  Data directory: {}", paths.base_dir().display());
            println!("  Settings file:  {}", paths.settings_file().display());
            println!();
            println!("Settings:");
            println!("  Server:           {}", settings.server_url);
            println!(
                "  Username:         {}",
                settings.username.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Key derivation:   argon2id m={}KiB t={} p={}",
                settings.key_derivation.memory_cost,
                settings.key_derivation.time_cost,
                settings.key_derivation.parallelism
            );
            println!("  Request timeout:  {}s", settings.request_timeout_secs);
            println!(
                "  Rotation:         {}s per call, {} attempts",
                settings.rotation_timeout_secs, settings.rotation_max_attempts
            );
        }
        Commands::List(args) => handle_list(&settings, args).await?,
        Commands::ChangePassword(args) => handle_change_password(&settings, args).await?,
        Commands::Recover(args) => handle_recover(&settings, args).await?,
        Commands::Revoke(args) => handle_revoke(&settings, args).await?,
    }

    Ok(())
}
