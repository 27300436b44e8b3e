//! # Escrowise: scheduled report dispatcher
//!
//! Usage:
//!   escrowise serve                      # Admin API (+ poll loop when configured)
//!   escrowise run-due                    # One dispatch batch, for cron
//!   escrowise run <id>                   # Run one scheduled report now
//!   escrowise report financial --params '{"startDate":"2024-03-01"}'
//!   escrowise import transactions rows.json
//!   escrowise init-config                # Write default config

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use escrowise_channels::EmailNotifier;
use escrowise_core::config::EscrowiseConfig;
use escrowise_core::traits::Notifier;
use escrowise_platform::{AdminServer, AdminState, PlatformDb};
use escrowise_reports::{
    DispatchOptions, Dispatcher, LogNotifier, ReportDb, ReportGenerator, Row, Table,
    render_report_html, spawn_report_scheduler,
};

#[derive(Parser)]
#[command(
    name = "escrowise",
    version,
    about = "📊 Escrowise — scheduled report dispatcher and admin API"
)]
struct Cli {
    /// Config file (default: ~/.escrowise/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the admin API; polls for due reports when poll_interval_secs > 0
    Serve {
        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Dispatch every due report once and exit
    RunDue,
    /// Run one scheduled report immediately
    Run { id: String },
    /// Generate a report ad hoc and print it
    Report {
        report_type: String,
        /// Parameter bag as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// Print the email HTML instead of the JSON payload
        #[arg(long)]
        html: bool,
    },
    /// Load source records from a JSON array file
    Import {
        /// transactions, profiles or disputes
        table: String,
        file: PathBuf,
    },
    /// Write the default config file
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .as_deref()
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(EscrowiseConfig::default_path)
}

fn load_config(path: &Path) -> Result<EscrowiseConfig> {
    let mut config = if path.exists() {
        EscrowiseConfig::load_from(path)?
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        EscrowiseConfig::default()
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

fn open_store(config: &EscrowiseConfig) -> Result<(Arc<ReportDb>, PathBuf)> {
    let db_path = PathBuf::from(expand_path(&config.database.path));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = ReportDb::open(&db_path)?;
    Ok((Arc::new(store), db_path))
}

fn build_dispatcher(config: &EscrowiseConfig, store: Arc<ReportDb>) -> Arc<Dispatcher> {
    let notifier: Arc<dyn Notifier> = if config.smtp.enabled {
        Arc::new(EmailNotifier::new(config.smtp.clone()))
    } else {
        tracing::warn!("SMTP disabled; reports will be logged, not emailed");
        Arc::new(LogNotifier)
    };
    let generator = Arc::new(ReportGenerator::new(store.clone()));
    Arc::new(Dispatcher::new(
        store,
        generator,
        notifier,
        DispatchOptions::from_config(&config.scheduler),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "escrowise=debug,escrowise_reports=debug,escrowise_platform=debug,tower_http=debug"
    } else {
        "escrowise=info,escrowise_reports=info,escrowise_platform=info,escrowise_channels=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let path = config_path(&cli);

    if let Command::InitConfig { force } = &cli.command {
        if path.exists() && !force {
            println!("⚠️  {} already exists (use --force to overwrite)", path.display());
            return Ok(());
        }
        EscrowiseConfig::default().save_to(&path)?;
        println!("✅ Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = load_config(&path)?;
    let (store, db_path) = open_store(&config)?;

    match cli.command {
        Command::Serve { port } => {
            let dispatcher = build_dispatcher(&config, store);
            let audit = PlatformDb::open(&db_path)?;
            let state = Arc::new(AdminState::new(dispatcher.clone(), audit));
            let port = port.unwrap_or(config.server.port);

            println!("📊 Escrowise v{}", env!("CARGO_PKG_VERSION"));
            println!("   🌐 Admin API:  http://{}:{port}/api/admin/reports/scheduled", config.server.host);
            println!("   🗄️  Database:   {}", db_path.display());
            println!("   📤 Notifier:   {}", dispatcher.notifier_name());

            let poller = if config.scheduler.poll_interval_secs > 0 {
                println!("   ⏰ Polling every {}s", config.scheduler.poll_interval_secs);
                Some(spawn_report_scheduler(
                    dispatcher.clone(),
                    config.scheduler.poll_interval_secs,
                ))
            } else {
                println!("   ⏰ Poll loop off (trigger via run-due)");
                None
            };
            println!();

            let served = AdminServer::start(state, &config.server.host, port).await;
            if let Some(handle) = poller {
                handle.abort();
            }
            served?;
        }
        Command::RunDue => {
            let dispatcher = build_dispatcher(&config, store);
            let summary = dispatcher.run_scheduled_reports(None).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.failed.is_empty() {
                anyhow::bail!("{} of {} reports failed", summary.failed.len(), summary.attempted);
            }
        }
        Command::Run { id } => {
            let dispatcher = build_dispatcher(&config, store);
            let report = dispatcher.run_report_now(&id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Report { report_type, params, html } => {
            let parameters: serde_json::Value =
                serde_json::from_str(&params).context("--params must be a JSON object")?;
            let generator = ReportGenerator::new(store);
            let payload = tokio::task::spawn_blocking(move || {
                generator.generate(&report_type, &parameters)
            })
            .await??;
            if html {
                println!("{}", render_report_html(&payload));
            } else {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
        }
        Command::Import { table, file } => {
            let table: Table = table.parse()?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<Row> = serde_json::from_str(&raw)
                .with_context(|| format!("{} must hold a JSON array of objects", file.display()))?;
            let count = store.import_records(table, &records)?;
            println!("✅ Imported {count} {} record(s)", table.name());
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
