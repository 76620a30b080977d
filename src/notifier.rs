//! State-diff notifier: compares each cycle's health records against the
//! previous cycle, applies the cooldown bookkeeping, and decides when and
//! what to alert.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use thiserror::Error;

use crate::probe::HealthRecord;

/// Inline status text is cut at this many characters in alert bodies.
const STATUS_INLINE_LIMIT: usize = 50;

/// Log lines are cut at this many characters in alert bodies.
const LOG_LINE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("message rendering failed: {0}")]
    Render(String),
    #[error(transparent)]
    Format(#[from] std::fmt::Error),
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

/// Process-wide monitor memory. Owned by a single [`StatusNotifier`]; the
/// scheduler serializes cycles, so there is never a concurrent evaluation.
/// Initialized empty at process start, never persisted.
#[derive(Debug, Default)]
pub struct MonitorState {
    /// Units currently believed offline.
    last_offline: BTreeSet<String>,
    /// Unit -> timestamp of the last notification about it. Pruned each
    /// cycle to units that are still offline.
    last_notified_at: HashMap<String, DateTime<Utc>>,
}

/// What one cycle decided. Computed fresh, consumed immediately.
#[derive(Debug, Default)]
pub struct NotificationDecision {
    pub notify: bool,
    pub newly_offline: Vec<String>,
    pub recovered: Vec<String>,
    /// All currently offline units, sorted.
    pub offline: Vec<String>,
    /// Offline units whose cooldown has elapsed (or that were never
    /// notified). Computed every cycle; informational for now, the notify
    /// trigger does not gate on it.
    pub past_cooldown: Vec<String>,
    pub message: Option<String>,
}

/// One cycle's view handed to the renderer.
pub struct CycleSummary<'a> {
    pub newly_offline: &'a [&'a HealthRecord],
    pub recovered: &'a [String],
    pub offline: &'a [&'a HealthRecord],
    pub now: DateTime<Utc>,
}

/// Rendering seam between the diff logic and the outbound message body.
pub trait AlertRenderer: Send + Sync {
    fn render(&self, cycle: &CycleSummary<'_>) -> Result<String, NotifyError>;
}

/// Holds the monitor state and runs the diff for each polling cycle.
pub struct StatusNotifier {
    renderer: Box<dyn AlertRenderer>,
    cooldown: Duration,
    state: MonitorState,
}

impl StatusNotifier {
    pub fn new(names: HashMap<String, String>, cooldown: Duration) -> Self {
        Self::with_renderer(cooldown, Box::new(TextRenderer::new(names)))
    }

    pub fn with_renderer(cooldown: Duration, renderer: Box<dyn AlertRenderer>) -> Self {
        Self {
            renderer,
            cooldown,
            state: MonitorState::default(),
        }
    }

    /// Evaluate one cycle. Never fails the caller: an evaluation error
    /// resets the offline memory (preferring a duplicate re-alert over a
    /// stuck "believed offline forever" state) and suppresses this cycle's
    /// notification.
    pub fn evaluate(
        &mut self,
        records: &[HealthRecord],
        now: DateTime<Utc>,
    ) -> NotificationDecision {
        match self.try_evaluate(records, now) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("status evaluation failed, resetting offline memory: {e}");
                self.state.last_offline.clear();
                NotificationDecision::default()
            }
        }
    }

    fn try_evaluate(
        &mut self,
        records: &[HealthRecord],
        now: DateTime<Utc>,
    ) -> Result<NotificationDecision, NotifyError> {
        let current_offline: BTreeSet<String> = records
            .iter()
            .filter(|r| r.is_offline())
            .map(|r| r.unit.clone())
            .collect();

        let newly_offline: Vec<String> = current_offline
            .difference(&self.state.last_offline)
            .cloned()
            .collect();
        let recovered: Vec<String> = self
            .state
            .last_offline
            .difference(&current_offline)
            .cloned()
            .collect();

        let past_cooldown: Vec<String> = current_offline
            .iter()
            .filter(|unit| match self.state.last_notified_at.get(*unit) {
                None => true,
                Some(ts) => now - *ts > self.cooldown,
            })
            .cloned()
            .collect();

        let notify = !newly_offline.is_empty()
            || !recovered.is_empty()
            || (current_offline.is_empty() && !self.state.last_offline.is_empty());

        let mut message = None;
        if notify {
            let mut offline_records: Vec<&HealthRecord> =
                records.iter().filter(|r| r.is_offline()).collect();
            offline_records.sort_by(|a, b| a.unit.cmp(&b.unit));
            let newly_records: Vec<&HealthRecord> = offline_records
                .iter()
                .copied()
                .filter(|r| newly_offline.contains(&r.unit))
                .collect();

            message = Some(self.renderer.render(&CycleSummary {
                newly_offline: &newly_records,
                recovered: &recovered,
                offline: &offline_records,
                now,
            })?);

            for unit in &newly_offline {
                self.state.last_notified_at.insert(unit.clone(), now);
            }
            for unit in &recovered {
                self.state.last_notified_at.remove(unit);
            }
        }

        self.state.last_offline = current_offline.clone();
        self.state
            .last_notified_at
            .retain(|unit, _| current_offline.contains(unit));

        Ok(NotificationDecision {
            notify,
            newly_offline,
            recovered,
            offline: current_offline.into_iter().collect(),
            past_cooldown,
            message,
        })
    }

    #[cfg(test)]
    fn state(&self) -> &MonitorState {
        &self.state
    }
}

/// Plain-text renderer for the outage and all-clear message variants.
pub struct TextRenderer {
    names: HashMap<String, String>,
}

impl TextRenderer {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    fn display<'a>(&'a self, unit: &'a str) -> &'a str {
        self.names.get(unit).map(String::as_str).unwrap_or(unit)
    }
}

impl AlertRenderer for TextRenderer {
    fn render(&self, cycle: &CycleSummary<'_>) -> Result<String, NotifyError> {
        let mut out = String::new();

        if cycle.offline.is_empty() {
            writeln!(out, "✅ All services are back online")?;
            writeln!(out)?;
            writeln!(out, "🟢 Recovered:")?;
            for unit in cycle.recovered {
                writeln!(out, "  • {}", self.display(unit))?;
            }
        } else {
            writeln!(out, "⚠️ Service status update")?;
            writeln!(out)?;
            if !cycle.newly_offline.is_empty() {
                writeln!(out, "🔴 Newly offline:")?;
                for rec in cycle.newly_offline {
                    writeln!(out, "  • {}", self.display(&rec.unit))?;
                }
            }
            if !cycle.recovered.is_empty() {
                writeln!(out, "🟢 Recovered:")?;
                for unit in cycle.recovered {
                    writeln!(out, "  • {}", self.display(unit))?;
                }
            }
            writeln!(out)?;
            writeln!(out, "📋 Currently offline:")?;
            for rec in cycle.offline {
                let (emoji, label) = status_label(rec);
                writeln!(
                    out,
                    "{emoji} {} - {label} ({})",
                    self.display(&rec.unit),
                    truncate_ellipsis(&rec.status, STATUS_INLINE_LIMIT)
                )?;
                for (i, line) in rec.last_logs.iter().enumerate() {
                    writeln!(
                        out,
                        "    {}. {}",
                        i + 1,
                        truncate_ellipsis(line, LOG_LINE_LIMIT)
                    )?;
                }
                if let Some(err) = &rec.error {
                    writeln!(out, "    error: {err}")?;
                }
            }
        }

        writeln!(out)?;
        write!(out, "🕒 {}", cycle.now.format("%d.%m.%Y %H:%M:%S"))?;
        Ok(out)
    }
}

/// Status emoji and label for a record.
pub fn status_label(record: &HealthRecord) -> (&'static str, &'static str) {
    if record.active {
        ("✅", "running")
    } else if record.error.is_some() {
        ("⚠️", "error")
    } else {
        ("❌", "stopped")
    }
}

/// Detail view of one service, used by the status and control front ends.
pub fn render_service_detail(record: &HealthRecord, display_name: &str) -> String {
    let (emoji, label) = status_label(record);
    let mut out = format!("🤖 {display_name}\nStatus: {emoji} {label}\n");

    if record.error.is_none() {
        if record.main_pid != "unknown" {
            out.push_str(&format!("PID: {}\n", record.main_pid));
        }
        if record.sub_state != "unknown" {
            out.push_str(&format!("State: {}\n", record.sub_state));
        }
    }

    if record.last_logs.is_empty() {
        out.push_str("\n📝 No logs found\n");
    } else {
        out.push_str(&format!(
            "\n📝 Last {} log entries:\n",
            record.last_logs.len()
        ));
        for (i, line) in record.last_logs.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}\n",
                i + 1,
                truncate_ellipsis(line, LOG_LINE_LIMIT)
            ));
        }
    }

    if let Some(err) = &record.error {
        out.push_str(&format!("\n❌ Error: {err}\n"));
    }

    out
}

/// Cut `s` to `max` characters, replacing the tail with "..." when it does
/// not fit. Operates on characters, not bytes.
fn truncate_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut cut: String = s.chars().take(max.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(unit: &str, active: bool, error: Option<&str>) -> HealthRecord {
        HealthRecord {
            unit: unit.to_string(),
            status: if active { "active" } else { "inactive" }.to_string(),
            active,
            load_state: "loaded".to_string(),
            sub_state: if active { "running" } else { "dead" }.to_string(),
            main_pid: "100".to_string(),
            memory_usage: "unknown".to_string(),
            cpu_usage: "unknown".to_string(),
            last_logs: vec![],
            has_log_errors: false,
            error: error.map(str::to_string),
            checked_at: Utc::now(),
        }
    }

    fn notifier() -> StatusNotifier {
        let names = HashMap::from([
            ("a.service".to_string(), "Alpha".to_string()),
            ("b.service".to_string(), "Beta".to_string()),
        ]);
        StatusNotifier::new(names, Duration::minutes(30))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[test]
    fn newly_offline_service_triggers_and_gets_timestamp() {
        let mut n = notifier();
        let now = at(0);

        // cycle 1: A goes down
        let d = n.evaluate(&[record("a.service", false, None), record("b.service", true, None)], now);
        assert!(d.notify);
        assert_eq!(d.newly_offline, vec!["a.service"]);
        assert_eq!(n.state().last_offline.len(), 1);
        assert!(n.state().last_notified_at.contains_key("a.service"));

        // cycle 2: B joins A. Only B is newly offline and only B gets a
        // fresh timestamp; A's stays as written in cycle 1.
        let later = at(60);
        let d = n.evaluate(
            &[record("a.service", false, None), record("b.service", false, None)],
            later,
        );
        assert!(d.notify);
        assert_eq!(d.newly_offline, vec!["b.service"]);
        assert!(d.recovered.is_empty());
        assert_eq!(d.offline, vec!["a.service", "b.service"]);
        assert_eq!(n.state().last_notified_at["a.service"], now);
        assert_eq!(n.state().last_notified_at["b.service"], later);
    }

    #[test]
    fn already_notified_service_keeps_no_entry_when_never_written() {
        let mut n = notifier();
        n.evaluate(&[record("a.service", false, None)], at(0));
        let d = n.evaluate(
            &[record("a.service", false, None), record("b.service", false, None)],
            at(10),
        );
        assert_eq!(d.newly_offline, vec!["b.service"]);
        // both offline units carry entries now, nothing else does
        assert_eq!(n.state().last_notified_at.len(), 2);
    }

    #[test]
    fn full_recovery_renders_all_clear_and_clears_state() {
        let mut n = notifier();
        n.evaluate(
            &[record("a.service", false, None), record("b.service", false, None)],
            at(0),
        );

        let d = n.evaluate(
            &[record("a.service", true, None), record("b.service", true, None)],
            at(120),
        );
        assert!(d.notify);
        assert_eq!(d.recovered, vec!["a.service", "b.service"]);
        assert!(d.offline.is_empty());
        let msg = d.message.unwrap();
        assert!(msg.contains("All services are back online"));
        assert!(msg.contains("Alpha"));
        assert!(n.state().last_offline.is_empty());
        assert!(n.state().last_notified_at.is_empty());
    }

    #[test]
    fn steady_offline_state_does_not_renotify() {
        let mut n = notifier();
        n.evaluate(&[record("a.service", false, None)], at(0));
        let d = n.evaluate(&[record("a.service", false, None)], at(60));
        assert!(!d.notify);
        assert!(d.message.is_none());
        assert_eq!(d.offline, vec!["a.service"]);
    }

    #[test]
    fn cooldown_partition_is_computed_every_cycle() {
        let mut n = notifier();
        n.evaluate(&[record("a.service", false, None)], at(0));

        // within cooldown: not past
        let d = n.evaluate(&[record("a.service", false, None)], at(60));
        assert!(d.past_cooldown.is_empty());

        // beyond cooldown: past, even though the trigger stays quiet
        let d = n.evaluate(&[record("a.service", false, None)], at(31 * 60));
        assert_eq!(d.past_cooldown, vec!["a.service"]);
        assert!(!d.notify);
    }

    #[test]
    fn probe_error_counts_as_offline() {
        let mut n = notifier();
        let d = n.evaluate(&[record("a.service", true, Some("command timed out"))], at(0));
        assert!(d.notify);
        assert_eq!(d.newly_offline, vec!["a.service"]);
    }

    #[test]
    fn evaluation_failure_resets_offline_memory() {
        struct FailingRenderer;
        impl AlertRenderer for FailingRenderer {
            fn render(&self, _cycle: &CycleSummary<'_>) -> Result<String, NotifyError> {
                Err(NotifyError::Render("boom".to_string()))
            }
        }

        let mut n =
            StatusNotifier::with_renderer(Duration::minutes(30), Box::new(FailingRenderer));
        n.state.last_offline.insert("a.service".to_string());

        let d = n.evaluate(&[record("b.service", false, None)], at(0));
        assert!(!d.notify);
        assert!(d.message.is_none());
        assert!(n.state().last_offline.is_empty());
    }

    #[test]
    fn outage_message_truncates_long_lines() {
        let mut n = notifier();
        let mut rec = record("a.service", false, None);
        rec.status = "x".repeat(80);
        rec.last_logs = vec!["y".repeat(150)];

        let d = n.evaluate(&[rec], at(0));
        let msg = d.message.unwrap();
        assert!(msg.contains(&format!("{}...", "x".repeat(47))));
        assert!(msg.contains(&format!("{}...", "y".repeat(97))));
        assert!(!msg.contains(&"y".repeat(98)));
        assert!(msg.contains("🕒"));
    }

    #[test]
    fn truncate_leaves_short_strings_alone() {
        assert_eq!(truncate_ellipsis("short", 50), "short");
        assert_eq!(truncate_ellipsis(&"a".repeat(51), 50).chars().count(), 50);
    }

    #[test]
    fn detail_view_shows_pid_and_logs() {
        let mut rec = record("a.service", true, None);
        rec.last_logs = vec!["line one".to_string(), "line two".to_string()];
        let detail = render_service_detail(&rec, "Alpha");
        assert!(detail.contains("🤖 Alpha"));
        assert!(detail.contains("PID: 100"));
        assert!(detail.contains("1. line one"));
    }

    #[test]
    fn detail_view_for_probe_failure_skips_properties() {
        let rec = HealthRecord::probe_failure("a.service", "timeout", "command timed out".into());
        let detail = render_service_detail(&rec, "Alpha");
        assert!(!detail.contains("PID:"));
        assert!(detail.contains("No logs found"));
        assert!(detail.contains("❌ Error: command timed out"));
    }
}
