//! Periodic jobs: the status pipeline and the KPI completeness check.
//!
//! Each job owns its own interval loop and runs in its own task, so a slow
//! or hung completeness check never delays a status cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use log::info;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::checker::ParallelChecker;
use crate::kpi::{self, KpiStore};
use crate::notifier::StatusNotifier;
use crate::sink::{self, NotificationSink};

/// The check -> diff -> notify pipeline for one cycle.
pub struct StatusJob {
    pub units: Vec<String>,
    pub checker: ParallelChecker,
    pub notifier: Arc<Mutex<StatusNotifier>>,
    pub sink: Arc<dyn NotificationSink>,
    pub admins: Vec<String>,
}

impl StatusJob {
    pub async fn run_cycle(&self) {
        let records = self.checker.check_all(&self.units).await;
        // Cycles serialize on the notifier lock: evaluate never runs
        // concurrently with itself.
        let decision = self.notifier.lock().await.evaluate(&records, Utc::now());
        if decision.notify
            && let Some(message) = &decision.message
        {
            info!(
                "status change: {} newly offline, {} recovered, {} offline total",
                decision.newly_offline.len(),
                decision.recovered.len(),
                decision.offline.len()
            );
            sink::fan_out(self.sink.as_ref(), &self.admins, message).await;
        }
    }
}

/// Data-completeness check against the store. Re-alerts on every mismatched
/// cycle; no cooldown applies.
pub struct KpiJob {
    pub store: Arc<dyn KpiStore>,
    pub expected: Vec<String>,
    pub sink: Arc<dyn NotificationSink>,
    pub admins: Vec<String>,
}

impl KpiJob {
    pub async fn run_cycle(&self) {
        let today = Local::now().date_naive();
        let report = kpi::check_completeness(self.store.as_ref(), &self.expected, today).await;
        if !report.complete {
            let message = kpi::render_kpi_alert(&report.missing);
            sink::fan_out(self.sink.as_ref(), &self.admins, &message).await;
        }
    }
}

/// Owns the periodic loops and the shutdown path.
#[derive(Default)]
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_status_loop(&mut self, job: StatusJob, every: Duration) {
        info!("status monitoring every {}s", every.as_secs());
        self.handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                job.run_cycle().await;
            }
        }));
    }

    pub fn spawn_kpi_loop(&mut self, job: KpiJob, every: Duration) {
        info!("kpi completeness check every {}s", every.as_secs());
        self.handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                job.run_cycle().await;
            }
        }));
    }

    /// Block until SIGINT/SIGTERM, then stop the loops.
    pub async fn run_until_shutdown(self) -> Result<()> {
        wait_for_signal().await?;
        for handle in &self.handles {
            handle.abort();
        }
        Ok(())
    }
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT - orderly shutdown"),
        _ = term.recv() => info!("SIGTERM - orderly shutdown"),
    }
    Ok(())
}
