//! Operator CLI for the mass payments engine.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mpe", about = "Mass payments engine operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Database operations.
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Configuration operations.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Audit log operations.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Operational sweeps.
    Ops {
        #[command(subcommand)]
        command: OpsCommand,
    },
    /// Worker process.
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Run the outbox worker loop against the paper rail.
    Run {
        /// Config paths, base first; later files override earlier ones.
        #[arg(long = "config", required = true)]
        configs: Vec<String>,
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
        #[arg(long, default_value_t = 8)]
        batch: i64,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Run embedded migrations. Refuses while files are mid-execution
    /// unless --force is given.
    Migrate {
        #[arg(long)]
        force: bool,
    },
    /// Connectivity and schema presence.
    Status,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Load layered YAML and print the canonical config hash.
    Hash {
        /// Paths, base first; later files override earlier ones.
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Verify the hash chain of an audit log file.
    Verify { path: String },
}

#[derive(Subcommand)]
enum OpsCommand {
    /// Flag files stuck in processing past their deadline.
    StuckScan,
    /// Return stale outbox claims to the queue.
    RecoverClaims {
        #[arg(long, default_value_t = 300)]
        ttl_secs: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience: .env.local then .env, both optional.
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Db { command } => match command {
            DbCommand::Migrate { force } => {
                let pool = mpe_db::connect_from_env().await?;
                let processing = mpe_db::count_processing_files(&pool).await?;
                if processing > 0 && !force {
                    bail!(
                        "{processing} file(s) are mid-execution; refusing to migrate. \
                        Re-run with --force once they are terminal."
                    );
                }
                mpe_db::migrate(&pool).await?;
                println!("migrations applied");
            }
            DbCommand::Status => {
                let pool = mpe_db::connect_from_env().await?;
                let st = mpe_db::status(&pool).await?;
                println!(
                    "connectivity: {}  files table: {}",
                    if st.ok { "ok" } else { "FAILED" },
                    if st.has_files_table { "present" } else { "missing" }
                );
            }
        },
        Command::Config { command } => match command {
            ConfigCommand::Hash { paths } => {
                let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
                let loaded = mpe_config::load_layered_yaml(&refs)?;
                println!("{}", loaded.config_hash);
            }
        },
        Command::Audit { command } => match command {
            AuditCommand::Verify { path } => match mpe_audit::verify_hash_chain(&path)? {
                mpe_audit::VerifyResult::Valid { lines } => {
                    println!("chain valid ({lines} events)");
                }
                mpe_audit::VerifyResult::Broken { line, reason } => {
                    bail!("chain broken at line {line}: {reason}");
                }
            },
        },
        Command::Ops { command } => match command {
            OpsCommand::StuckScan => {
                let pool = mpe_db::connect_from_env().await?;
                let flagged = mpe_runtime::scan_stuck_files(&pool).await?;
                println!("flagged {} stuck file(s)", flagged.len());
                for id in flagged {
                    println!("  {id}");
                }
            }
            OpsCommand::RecoverClaims { ttl_secs } => {
                let pool = mpe_db::connect_from_env().await?;
                let released = mpe_runtime::recover_stale_claims(&pool, ttl_secs).await?;
                println!("released {released} stale claim(s)");
            }
        },
        Command::Worker { command } => match command {
            WorkerCommand::Run {
                configs,
                poll_ms,
                batch,
            } => {
                let refs: Vec<&str> = configs.iter().map(|s| s.as_str()).collect();
                let loaded = mpe_config::load_layered_yaml(&refs)?;
                let state = mpe_runtime::EngineState::from_loaded(&loaded)?;
                println!("config hash: {}", state.config_hash);

                let pool = mpe_db::connect_from_env().await?;
                let mut audit =
                    mpe_audit::DecisionLog::open_resuming(&state.audit.path, state.audit.hash_chain)?;

                let worker = mpe_runtime::Worker::new(
                    pool,
                    state,
                    std::sync::Arc::new(mpe_runtime::PaperRail),
                    format!("mpe-{}", std::process::id()),
                );
                worker
                    .run_loop(
                        &mut audit,
                        std::time::Duration::from_millis(poll_ms),
                        batch,
                    )
                    .await?;
            }
        },
    }

    Ok(())
}
