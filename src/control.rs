//! Privileged service lifecycle control using systemd (systemctl).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

/// Result of a control action. Failures are reported here, never raised.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

/// Abstract privileged control capability over a unit's lifecycle.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn apply(&self, unit: &str, action: ServiceAction) -> CommandOutcome;
}

/// Controller that shells out to `sudo systemctl <action> <unit>`.
///
/// Waits for the command to complete (no timeout); callers run it off the
/// scheduler's loop so the timer is never blocked.
pub struct SystemdController;

#[async_trait]
impl ServiceController for SystemdController {
    async fn apply(&self, unit: &str, action: ServiceAction) -> CommandOutcome {
        let output = Command::new("sudo")
            .args(["systemctl", action.as_str(), unit])
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => CommandOutcome {
                success: true,
                message: format!("systemctl {} {unit} completed", action.as_str()),
            },
            Ok(out) => CommandOutcome::failed(format!(
                "systemctl {} {unit} failed: {}",
                action.as_str(),
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            Err(e) => CommandOutcome::failed(format!("failed to launch systemctl: {e}")),
        }
    }
}

/// Executes operator control actions and carries the settle delay callers
/// should wait before re-probing. Control actions only change the observed
/// state on the next probe; the two are not transactionally linked.
pub struct CommandExecutor {
    controller: Arc<dyn ServiceController>,
    settle_delay: Duration,
}

impl CommandExecutor {
    pub fn new(controller: Arc<dyn ServiceController>, settle_delay: Duration) -> Self {
        Self {
            controller,
            settle_delay,
        }
    }

    pub async fn execute(&self, unit: &str, action: ServiceAction) -> CommandOutcome {
        self.controller.apply(unit, action).await
    }

    /// Execute an action given as free text (the form in which front ends
    /// hand it over). An unknown action fails immediately without touching
    /// any external process.
    pub async fn execute_raw(&self, unit: &str, action: &str) -> CommandOutcome {
        match action.parse::<ServiceAction>() {
            Ok(action) => self.execute(unit, action).await,
            Err(e) => CommandOutcome::failed(e.to_string()),
        }
    }

    /// Give the unit time to change state before the follow-up probe.
    pub async fn settle(&self) {
        tokio::time::sleep(self.settle_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingController {
        calls: AtomicUsize,
        outcome_success: bool,
    }

    #[async_trait]
    impl ServiceController for CountingController {
        async fn apply(&self, unit: &str, action: ServiceAction) -> CommandOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CommandOutcome {
                success: self.outcome_success,
                message: format!("{} {unit}", action.as_str()),
            }
        }
    }

    fn executor(success: bool) -> (Arc<CountingController>, CommandExecutor) {
        let controller = Arc::new(CountingController {
            calls: AtomicUsize::new(0),
            outcome_success: success,
        });
        let exec = CommandExecutor::new(controller.clone(), Duration::from_millis(1));
        (controller, exec)
    }

    #[tokio::test]
    async fn unknown_action_short_circuits() {
        let (controller, exec) = executor(true);
        let outcome = exec.execute_raw("gifter.service", "explode").await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("unknown action"));
        assert_eq!(controller.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn known_action_reaches_controller() {
        let (controller, exec) = executor(true);
        let outcome = exec.execute_raw("gifter.service", "restart").await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "restart gifter.service");
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn controller_failure_is_reported_not_raised() {
        let (_, exec) = executor(false);
        let outcome = exec.execute("oliver.service", ServiceAction::Stop).await;
        assert!(!outcome.success);
    }

    #[test]
    fn action_round_trip() {
        for s in ["start", "stop", "restart"] {
            assert_eq!(s.parse::<ServiceAction>().unwrap().as_str(), s);
        }
        assert!("reload".parse::<ServiceAction>().is_err());
    }
}
