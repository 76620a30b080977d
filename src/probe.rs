//! Single-service health probe.
//!
//! One probe runs three inspections against a unit (liveness, property dump,
//! recent log tail) and merges them into a [`HealthRecord`]. A probe never
//! fails its caller: timeouts and launch errors are folded into the record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::Command;

/// Number of journal lines fetched per probe, most-recent-last.
pub const LOG_TAIL_LINES: usize = 5;

/// Default per-inspection wait bound.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Substrings that mark a log line as an error indicator.
const LOG_ERROR_MARKERS: [&str; 3] = ["error", "failed", "exception"];

/// Result of one probe execution. Created fresh every cycle, never mutated.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    /// Unit name the probe ran against.
    pub unit: String,
    /// Raw liveness output ("active", "inactive", "timeout", "error", ...).
    pub status: String,
    pub active: bool,
    pub load_state: String,
    pub sub_state: String,
    pub main_pid: String,
    pub memory_usage: String,
    pub cpu_usage: String,
    /// Last journal lines, most-recent-last, bounded to [`LOG_TAIL_LINES`].
    pub last_logs: Vec<String>,
    pub has_log_errors: bool,
    /// Set instead of the detail fields when the probe itself failed.
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthRecord {
    /// A service is offline when it is not reported active, or its probe
    /// itself errored.
    pub fn is_offline(&self) -> bool {
        !self.active || self.error.is_some()
    }

    /// Record for a unit whose probe could not complete.
    pub fn probe_failure(unit: &str, status: &str, error: String) -> Self {
        Self {
            unit: unit.to_string(),
            status: status.to_string(),
            active: false,
            load_state: "unknown".to_string(),
            sub_state: "unknown".to_string(),
            main_pid: "unknown".to_string(),
            memory_usage: "unknown".to_string(),
            cpu_usage: "unknown".to_string(),
            last_logs: Vec::new(),
            has_log_errors: false,
            error: Some(error),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("command timed out")]
    Timeout,
    #[error("failed to launch {command}: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },
}

/// Abstract inspection capability.
///
/// The reference deployment is systemd, but the probe only needs liveness,
/// a key=value property dump, and a bounded log tail, so anything that can
/// answer those (a container runtime, a health URL) can stand in.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Raw liveness string for the unit ("active" means up).
    async fn liveness(&self, unit: &str) -> Result<String, ProbeError>;

    /// Property dump as key=value lines.
    async fn properties(&self, unit: &str) -> Result<String, ProbeError>;

    /// Last `lines` log entries, most-recent-last.
    async fn recent_logs(&self, unit: &str, lines: usize) -> Result<Vec<String>, ProbeError>;
}

/// Inspector backed by systemctl / journalctl.
pub struct SystemdInspector {
    timeout: Duration,
}

impl SystemdInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run one external command with the probe's wait bound.
    ///
    /// Non-zero exit is informational (systemctl is-active exits 3 when the
    /// unit is inactive); stdout is returned regardless. Only launch failure
    /// and timeout are errors. `kill_on_drop` reaps a timed-out child.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, ProbeError> {
        let output = Command::new(program).args(args).kill_on_drop(true).output();

        match tokio::time::timeout(self.timeout, output).await {
            Err(_) => Err(ProbeError::Timeout),
            Ok(Err(source)) => Err(ProbeError::Launch {
                command: program.to_string(),
                source,
            }),
            Ok(Ok(out)) => Ok(String::from_utf8_lossy(&out.stdout).trim().to_string()),
        }
    }
}

impl Default for SystemdInspector {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Inspector for SystemdInspector {
    async fn liveness(&self, unit: &str) -> Result<String, ProbeError> {
        self.run("systemctl", &["is-active", unit]).await
    }

    async fn properties(&self, unit: &str) -> Result<String, ProbeError> {
        self.run("systemctl", &["show", unit, "--no-page"]).await
    }

    async fn recent_logs(&self, unit: &str, lines: usize) -> Result<Vec<String>, ProbeError> {
        let count = lines.to_string();
        let out = self
            .run(
                "journalctl",
                &["-u", unit, "-n", &count, "--no-pager", "--output=short"],
            )
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Inspect one unit and merge the results into a [`HealthRecord`].
///
/// A timeout on any inspection abandons the remaining ones for this unit and
/// yields a `status="timeout"` record; a launch failure yields
/// `status="error"`. Neither is propagated to the caller.
pub async fn probe(inspector: &dyn Inspector, unit: &str) -> HealthRecord {
    let status = match inspector.liveness(unit).await {
        Ok(s) => s,
        Err(e) => return failure_record(unit, e),
    };
    let dump = match inspector.properties(unit).await {
        Ok(d) => d,
        Err(e) => return failure_record(unit, e),
    };
    let last_logs = match inspector.recent_logs(unit, LOG_TAIL_LINES).await {
        Ok(l) => l,
        Err(e) => return failure_record(unit, e),
    };

    let props = parse_properties(&dump);
    let has_log_errors = scan_log_errors(&last_logs);
    let active = status == "active";

    HealthRecord {
        unit: unit.to_string(),
        status,
        active,
        load_state: props.load_state,
        sub_state: props.sub_state,
        main_pid: props.main_pid,
        memory_usage: props.memory_usage,
        cpu_usage: props.cpu_usage,
        last_logs,
        has_log_errors,
        error: None,
        checked_at: Utc::now(),
    }
}

fn failure_record(unit: &str, err: ProbeError) -> HealthRecord {
    let status = match err {
        ProbeError::Timeout => "timeout",
        ProbeError::Launch { .. } => "error",
    };
    HealthRecord::probe_failure(unit, status, err.to_string())
}

struct ServiceProperties {
    load_state: String,
    sub_state: String,
    main_pid: String,
    memory_usage: String,
    cpu_usage: String,
}

/// Parse a `systemctl show` dump. Absent keys default to "unknown".
fn parse_properties(dump: &str) -> ServiceProperties {
    let mut load_state = None;
    let mut sub_state = None;
    let mut main_pid = None;
    let mut memory_usage = None;
    let mut cpu_usage = None;

    for line in dump.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.to_string();
            match key {
                "LoadState" => load_state = Some(value),
                "SubState" => sub_state = Some(value),
                "MainPID" => main_pid = Some(value),
                "MemoryCurrent" => memory_usage = Some(value),
                "CPUUsageNSec" => cpu_usage = Some(value),
                _ => {}
            }
        }
    }

    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "unknown".to_string());
    ServiceProperties {
        load_state: or_unknown(load_state),
        sub_state: or_unknown(sub_state),
        main_pid: or_unknown(main_pid),
        memory_usage: or_unknown(memory_usage),
        cpu_usage: or_unknown(cpu_usage),
    }
}

/// Case-insensitive scan for error indicators across the log tail.
fn scan_log_errors(logs: &[String]) -> bool {
    logs.iter().any(|line| {
        let lower = line.to_lowercase();
        LOG_ERROR_MARKERS.iter().any(|m| lower.contains(m))
    })
}
