use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loyal_config::{LogFormat, LogSettings};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "loyal")]
#[command(about = "Loyalty service operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Reconciliation commands
    Reconcile {
        #[command(subcommand)]
        cmd: ReconcileCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity and schema presence
    Status,

    /// Apply embedded SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum ReconcileCmd {
    /// Run exactly one reconciliation cycle and print its report
    Once {
        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Accrual authority base URL (overrides ACCRUAL_SYSTEM_ADDRESS)
        #[arg(short = 'r', long = "accrual-address")]
        accrual_address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let url = commands::database_url_from_env()?;
            let pool = loyal_db::connect(&url).await?;
            match cmd {
                DbCmd::Status => {
                    let s = loyal_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                }
                DbCmd::Migrate => {
                    loyal_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = loyal_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Reconcile { cmd } => match cmd {
            ReconcileCmd::Once {
                config_paths,
                accrual_address,
            } => {
                let settings = commands::resolve_settings(
                    &config_paths,
                    commands::reconcile::flags(accrual_address),
                )?;
                init_tracing(&settings.log)?;
                let url = commands::database_url_from_env()?;
                commands::reconcile::run_once(&settings, &url).await?;
            }
        },
    }

    Ok(())
}

/// Same rules as the daemon: `RUST_LOG` wins over `log.filter`. Output goes
/// to stderr so stdout stays machine-readable.
fn init_tracing(log: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .with_context(|| format!("invalid log filter: {}", log.filter))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match log.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))
}
