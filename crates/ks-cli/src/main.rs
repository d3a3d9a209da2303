use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(name = "ks")]
#[command(about = "Kill switch operator CLI", long_about = None)]
struct Cli {
    /// Config layers in merge order. Defaults to KS_CONFIG, then config/base.yaml.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

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
        /// Paths in merge order (base -> env -> site ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Print the current kill switch status
    Status {
        /// Principal running the command (must be the operator)
        #[arg(long)]
        principal_id: String,
    },

    /// Engage the kill switch (operator only)
    Activate {
        #[arg(long)]
        principal_id: String,

        /// Human label recorded with the transition (e.g. email)
        #[arg(long)]
        label: Option<String>,

        /// Why the switch is being engaged (required, non-blank)
        #[arg(long)]
        reason: String,
    },

    /// Release the kill switch (operator only)
    Deactivate {
        #[arg(long)]
        principal_id: String,

        #[arg(long)]
        label: Option<String>,

        /// Defaults to the configured deactivation reason
        #[arg(long)]
        reason: Option<String>,
    },

    /// Most recent audit records, newest first
    Logs {
        #[arg(long)]
        principal_id: String,

        #[arg(long)]
        limit: Option<u32>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations (idempotent).
    Migrate,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain, from the database or from an exported JSONL file
    Verify {
        /// Exported JSONL file; verifies offline without a database
        #[arg(long)]
        file: Option<String>,
    },

    /// Export the full audit trail as JSONL
    Export {
        #[arg(long)]
        out: String,
    },

    /// Append a VERIFIED record (external heartbeat / verification probes)
    RecordVerified {
        #[arg(long)]
        principal_id: String,

        #[arg(long)]
        label: Option<String>,

        /// Details JSON string
        #[arg(long, conflicts_with = "details_file")]
        details: Option<String>,

        /// Path to a details JSON file
        #[arg(long = "details-file", conflicts_with = "details")]
        details_file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let ctx = Context::new(cli.config_paths);

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = ks_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = ks_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_state_table={} has_audit_table={}",
                        s.ok, s.has_state_table, s.has_audit_table
                    );
                }
                DbCmd::Migrate => {
                    ks_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = ks_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Status { principal_id } => {
            commands::switch::status(&ctx, &principal_id).await?;
        }

        Commands::Activate {
            principal_id,
            label,
            reason,
        } => {
            commands::switch::activate(&ctx, &principal_id, label, &reason).await?;
        }

        Commands::Deactivate {
            principal_id,
            label,
            reason,
        } => {
            commands::switch::deactivate(&ctx, &principal_id, label, reason.as_deref()).await?;
        }

        Commands::Logs {
            principal_id,
            limit,
        } => {
            commands::switch::logs(&ctx, &principal_id, limit).await?;
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { file } => commands::audit::verify(&ctx, file.as_deref()).await?,
            AuditCmd::Export { out } => commands::audit::export(&ctx, &out).await?,
            AuditCmd::RecordVerified {
                principal_id,
                label,
                details,
                details_file,
            } => {
                let details = commands::load_details(details, details_file)?;
                commands::audit::record_verified(&ctx, &principal_id, label, details).await?;
            }
        },
    }

    Ok(())
}

/// Logs go to stderr so stdout stays parseable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
