use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "kassa")]
#[command(about = "Daily cash reconciliation CLI", long_about = None)]
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
        /// Paths in merge order (base -> site -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Aggregate every enabled source for a terminal-day and print the result.
    /// Nothing is written to the ledger.
    Fetch {
        #[arg(long)]
        terminal: String,

        /// Business date, YYYY-MM-DD
        #[arg(long)]
        date: String,

        /// Local time HH:MM narrowing the window end
        #[arg(long)]
        cutoff: Option<String>,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Stored report commands (requires KASSA_DATABASE_URL)
    Report {
        #[command(subcommand)]
        cmd: ReportCmd,
    },

    /// Terminal/credential directory seeding (requires KASSA_DATABASE_URL)
    Directory {
        #[command(subcommand)]
        cmd: DirectoryCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chains of an audit JSONL mirror.
    Verify {
        path: String,
    },
}

#[derive(Subcommand)]
enum ReportCmd {
    /// Print the stored ledger with its derived figures
    Show {
        #[arg(long)]
        terminal: String,
        #[arg(long)]
        date: String,
    },

    /// Print the audit history of a ledger, oldest first
    History {
        #[arg(long)]
        terminal: String,
        #[arg(long)]
        date: String,
    },
}

#[derive(Subcommand)]
enum DirectoryCmd {
    Organization {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },

    Terminal {
        #[arg(long)]
        id: String,
        #[arg(long)]
        organization: String,
        #[arg(long)]
        name: String,
        /// POS group the cashier totals are filtered by
        #[arg(long)]
        pos_group: Option<String>,
        /// IANA timezone overriding the configured one
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Store one credential (terminal | organization)
    Credential {
        #[arg(long)]
        model: String,
        #[arg(long)]
        model_id: String,
        #[arg(long = "type")]
        cred_type: String,
        #[arg(long)]
        value: String,
    },

    /// Set a process-wide setting (workStartTime, workEndTime)
    Setting {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = kassa_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = kassa_db::status(&pool).await?;
                    println!("db_ok={} has_ledger_tables={}", s.ok, s.has_ledger_tables);
                }
                DbCmd::Migrate => {
                    kassa_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = kassa_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => commands::audit_verify(&path)?,
        },

        Commands::Fetch {
            terminal,
            date,
            cutoff,
            config_paths,
        } => {
            let date = parse_date(&date)?;
            let cutoff = cutoff.as_deref().map(parse_cutoff).transpose()?;
            commands::fetch::dry_run(&config_paths, &terminal, date, cutoff).await?;
        }

        Commands::Report { cmd } => {
            let pool = kassa_db::connect_from_env().await?;
            match cmd {
                ReportCmd::Show { terminal, date } => {
                    commands::report::show(pool, &terminal, parse_date(&date)?).await?
                }
                ReportCmd::History { terminal, date } => {
                    commands::report::history(pool, &terminal, parse_date(&date)?).await?
                }
            }
        }

        Commands::Directory { cmd } => {
            let pool = kassa_db::connect_from_env().await?;
            match cmd {
                DirectoryCmd::Organization { id, name } => {
                    kassa_db::upsert_organization(&pool, &id, &name).await?;
                    println!("organization_saved=true id={}", id);
                }
                DirectoryCmd::Terminal {
                    id,
                    organization,
                    name,
                    pos_group,
                    timezone,
                } => {
                    let terminal = kassa_schemas::Terminal {
                        id: id.clone(),
                        organization_id: organization,
                        name,
                        pos_group_id: pos_group,
                        timezone,
                    };
                    kassa_db::upsert_terminal(&pool, &terminal).await?;
                    println!("terminal_saved=true id={}", id);
                }
                DirectoryCmd::Credential {
                    model,
                    model_id,
                    cred_type,
                    value,
                } => {
                    let model = commands::parse_credential_model(&model)?;
                    kassa_db::put_credential(&pool, model, &model_id, &cred_type, &value).await?;
                    println!(
                        "credential_saved=true model={} model_id={} type={}",
                        model.as_str(),
                        model_id,
                        cred_type
                    );
                }
                DirectoryCmd::Setting { key, value } => {
                    kassa_db::put_setting(&pool, &key, &value).await?;
                    println!("setting_saved=true key={}", key);
                }
            }
        }
    }

    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid --date '{}'. expected YYYY-MM-DD", raw))
}

fn parse_cutoff(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("invalid --cutoff '{}'. expected HH:MM", raw))
}
