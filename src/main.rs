mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::sync::Mutex;

use fleetmond::checker::ParallelChecker;
use fleetmond::config::{self, FleetConfig};
use fleetmond::control::{CommandExecutor, SystemdController};
use fleetmond::kpi::{self, PgKpiStore};
use fleetmond::notifier::{self, StatusNotifier};
use fleetmond::probe::SystemdInspector;
use fleetmond::scheduler::{KpiJob, Scheduler, StatusJob};
use fleetmond::sink::LogSink;

fn main() {
    // Initialize logger with custom format for daemon
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(real_main()) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn real_main() -> Result<()> {
    let args = cli::Args::parse();
    let cfg_path = config::resolve_config_path(args.config, args.system)?;

    match args.sub.unwrap_or(cli::Cmd::Run) {
        cli::Cmd::Run => run_monitor(&cfg_path).await,
        cli::Cmd::Status { unit } => handle_status(&cfg_path, unit).await,
        cli::Cmd::Ctl { unit, action } => handle_ctl(&cfg_path, &unit, &action).await,
        cli::Cmd::Kpi => handle_kpi(&cfg_path).await,
    }
}

/// Normal daemon operation: spawn the periodic loops and run until signal.
async fn run_monitor(cfg_path: &Path) -> Result<()> {
    let cfg = FleetConfig::load_or_create(cfg_path)?;
    info!("Using config from: {}", cfg_path.display());

    let sink = Arc::new(LogSink);
    let mut scheduler = Scheduler::new();

    if cfg.monitoring.enabled && !cfg.services.is_empty() {
        let inspector = Arc::new(SystemdInspector::new(cfg.monitoring.probe_timeout()));
        let notifier = StatusNotifier::new(cfg.display_names(), cfg.monitoring.cooldown());
        scheduler.spawn_status_loop(
            StatusJob {
                units: cfg.units(),
                checker: ParallelChecker::new(inspector),
                notifier: Arc::new(Mutex::new(notifier)),
                sink: sink.clone(),
                admins: cfg.notify.admins.clone(),
            },
            cfg.monitoring.poll_interval(),
        );
    } else {
        info!("service status monitoring disabled");
    }

    if cfg.kpi.enabled {
        let url = cfg
            .kpi
            .database_url
            .as_deref()
            .context("kpi.database_url is required when the kpi check is enabled")?;
        let store = PgKpiStore::connect(url, cfg.kpi.excluded_divisions.clone())
            .await
            .context("Failed to connect to the kpi store")?;
        scheduler.spawn_kpi_loop(
            KpiJob {
                store: Arc::new(store),
                expected: cfg.kpi.expected_divisions.clone(),
                sink: sink.clone(),
                admins: cfg.notify.admins.clone(),
            },
            cfg.kpi.check_interval(),
        );
    }

    info!("fleetmond started (pid {})", std::process::id());
    scheduler.run_until_shutdown().await?;
    info!("fleetmond exiting");
    Ok(())
}

/// One-shot status check: summary over the whole universe, or a detail view
/// for a single unit.
async fn handle_status(cfg_path: &Path, unit: Option<String>) -> Result<()> {
    let cfg = FleetConfig::load_or_create(cfg_path)?;
    let inspector = Arc::new(SystemdInspector::new(cfg.monitoring.probe_timeout()));
    let checker = ParallelChecker::new(inspector);

    match unit {
        Some(unit) => {
            let records = checker.check_all(std::slice::from_ref(&unit)).await;
            if let Some(record) = records.first() {
                println!(
                    "{}",
                    notifier::render_service_detail(record, cfg.display_name_of(&unit))
                );
            }
            Ok(())
        }
        None => {
            let mut records = checker.check_all(&cfg.units()).await;
            records.sort_by(|a, b| a.unit.cmp(&b.unit));

            println!("🩹 Service status:\n");
            for record in &records {
                let (emoji, label) = notifier::status_label(record);
                println!("{emoji} {} - {label}", cfg.display_name_of(&record.unit));
            }
            if records.iter().any(|r| r.is_offline()) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Execute a control action, wait the settle delay, then show fresh status.
async fn handle_ctl(cfg_path: &Path, unit: &str, action: &str) -> Result<()> {
    let cfg = FleetConfig::load_or_create(cfg_path)?;
    let display = cfg.display_name_of(unit).to_string();
    let executor = CommandExecutor::new(Arc::new(SystemdController), cfg.monitoring.settle_delay());

    println!("🔄 Running {action} on {display}...");
    let outcome = executor.execute_raw(unit, action).await;
    if outcome.success {
        println!("✅ {action} of {display} completed");
    } else {
        eprintln!("❌ {action} of {display} failed:\n{}", outcome.message);
    }

    // The action only shows up on the next probe; give the unit time to
    // change state first.
    executor.settle().await;
    let inspector = Arc::new(SystemdInspector::new(cfg.monitoring.probe_timeout()));
    let checker = ParallelChecker::new(inspector);
    let records = checker.check_all(&[unit.to_string()]).await;
    if let Some(record) = records.first() {
        println!("{}", notifier::render_service_detail(record, &display));
    }

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

/// One-shot KPI completeness check against the store.
async fn handle_kpi(cfg_path: &Path) -> Result<()> {
    let cfg = FleetConfig::load_or_create(cfg_path)?;
    let url = cfg
        .kpi
        .database_url
        .as_deref()
        .context("kpi.database_url is not configured")?;
    let store = PgKpiStore::connect(url, cfg.kpi.excluded_divisions.clone())
        .await
        .context("Failed to connect to the kpi store")?;

    let today = chrono::Local::now().date_naive();
    let report = kpi::check_completeness(&store, &cfg.kpi.expected_divisions, today).await;
    if report.complete {
        println!("✅ KPI data is complete for {}", today.format("%d.%m.%Y"));
        Ok(())
    } else {
        println!("{}", kpi::render_kpi_alert(&report.missing));
        std::process::exit(1);
    }
}
