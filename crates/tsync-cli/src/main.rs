use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "tsync")]
#[command(about = "Merge x-ui panel traffic counters into one local database", long_about = None)]
struct Cli {
    /// Also append logs to this file (console logging stays on).
    #[arg(long, global = true, env = "TSYNC_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every configured panel's database and merge it into the local one
    Run {
        /// Server list (JSON array of {name, base_url, user, pass})
        #[arg(long, env = tsync_config::ENV_SERVERS_PATH, default_value = tsync_config::DEFAULT_SERVERS_PATH)]
        servers: PathBuf,

        /// Local x-ui database
        #[arg(long, env = tsync_db::ENV_LOCAL_DB, default_value = tsync_db::DEFAULT_LOCAL_DB)]
        local_db: PathBuf,

        /// Where downloaded databases are stored (downloaded{n}.db)
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Servers fetched in parallel
        #[arg(long, default_value_t = tsync_runtime::DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Repeat every N seconds until ctrl-c instead of running once
        #[arg(long)]
        every: Option<u64>,
    },

    /// Merge an already-downloaded panel database (no network)
    ReconcileFile {
        /// Downloaded panel database
        #[arg(long)]
        snapshot: PathBuf,

        /// Local x-ui database
        #[arg(long, env = tsync_db::ENV_LOCAL_DB, default_value = tsync_db::DEFAULT_LOCAL_DB)]
        local_db: PathBuf,

        /// Print the computed updates without applying them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Validate a server list and print what would be used
    CheckConfig {
        #[arg(long, env = tsync_config::ENV_SERVERS_PATH, default_value = tsync_config::DEFAULT_SERVERS_PATH)]
        servers: PathBuf,
    },

    /// Local database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status {
        #[arg(long, env = tsync_db::ENV_LOCAL_DB, default_value = tsync_db::DEFAULT_LOCAL_DB)]
        local_db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local before clap reads env fallbacks.
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    commands::init_tracing(cli.log_file.as_deref())?;

    match cli.cmd {
        Commands::Run {
            servers,
            local_db,
            work_dir,
            concurrency,
            every,
        } => {
            commands::sync::run(commands::sync::RunArgs {
                servers,
                local_db,
                work_dir,
                concurrency,
                every,
            })
            .await?;
        }

        Commands::ReconcileFile {
            snapshot,
            local_db,
            dry_run,
        } => {
            commands::sync::reconcile_file(&snapshot, &local_db, dry_run).await?;
        }

        Commands::CheckConfig { servers } => {
            commands::check_config(&servers)?;
        }

        Commands::Db { cmd } => match cmd {
            DbCmd::Status { local_db } => {
                let db = tsync_db::LocalDb::connect(&local_db)
                    .await
                    .with_context(|| format!("open local db {}", local_db.display()))?;
                let s = db.status().await?;
                println!(
                    "db_ok={} has_client_traffics={} has_inbounds={} clients={} inbounds={}",
                    s.ok, s.has_client_traffics, s.has_inbounds, s.client_count, s.inbound_count
                );
            }
        },
    }

    Ok(())
}
