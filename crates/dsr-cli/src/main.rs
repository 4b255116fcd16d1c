use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "dsr")]
#[command(about = "Device status reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        /// Layered config paths; `/db/url_env` names the database env var
        #[arg(long = "config", global = true)]
        config_paths: Vec<String>,

        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> tenant overrides...)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail instead of warn when the merged config has keys nobody reads.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Reconcile one feed run against the device table.
    Reconcile {
        /// Feed run id
        #[arg(long)]
        run_id: String,

        /// Narrow the call to one tenant (must match the run's scope, if any)
        #[arg(long)]
        tenant: Option<String>,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Feed run reporting
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Audit journal utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum RunCmd {
    /// Print the run row and its per-tenant verdicts.
    Summary {
        #[arg(long)]
        run_id: String,

        /// Layered config paths; `/db/url_env` names the database env var
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of a JSONL audit journal.
    Verify {
        #[arg(long)]
        path: String,
    },

    /// Print journal entries as JSON lines, filtered by run and/or new status.
    Query {
        #[arg(long)]
        path: String,

        #[arg(long)]
        run_id: Option<String>,

        /// ACTIVE | SUSPENDED | INACTIVE | UNKNOWN
        #[arg(long)]
        new_status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { config_paths, cmd } => {
            let db = commands::open_db(&config_paths).await?;
            let pool = db.store.pool();
            match cmd {
                DbCmd::Status => {
                    let s = dsr_db::status(pool).await?;
                    println!("db_ok={} has_devices_table={}", s.ok, s.has_devices_table);
                }
                DbCmd::Migrate => {
                    dsr_db::migrate(pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths, strict } => {
            commands::config_hash(&paths, strict)?;
        }

        Commands::Reconcile {
            run_id,
            tenant,
            config_paths,
        } => {
            commands::reconcile::run(&run_id, tenant.as_deref(), &config_paths).await?;
        }

        Commands::Run { cmd } => match cmd {
            RunCmd::Summary {
                run_id,
                config_paths,
            } => {
                commands::reconcile::summary(&run_id, &config_paths).await?;
            }
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => commands::audit::verify(&path)?,
            AuditCmd::Query {
                path,
                run_id,
                new_status,
            } => commands::audit::query(&path, run_id.as_deref(), new_status.as_deref())?,
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
