//! Concurrent fan-out over the monitoring universe.

use std::sync::Arc;

use log::error;

use crate::probe::{self, HealthRecord, Inspector};

/// Runs one probe task per unit and joins the batch.
///
/// Probes are independent: no ordering between them, no shared state, and a
/// failing probe never blocks or aborts its siblings.
pub struct ParallelChecker {
    inspector: Arc<dyn Inspector>,
}

impl ParallelChecker {
    pub fn new(inspector: Arc<dyn Inspector>) -> Self {
        Self { inspector }
    }

    /// Check every unit concurrently. Always returns exactly one record per
    /// input unit: a probe task that dies is replaced by a placeholder
    /// record carrying a synthetic error.
    pub async fn check_all(&self, units: &[String]) -> Vec<HealthRecord> {
        let handles: Vec<_> = units
            .iter()
            .map(|unit| {
                let inspector = Arc::clone(&self.inspector);
                let unit = unit.clone();
                tokio::spawn(async move { probe::probe(inspector.as_ref(), &unit).await })
            })
            .collect();

        let mut records = Vec::with_capacity(units.len());
        for (unit, handle) in units.iter().zip(handles) {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("probe task for {unit} died: {e}");
                    records.push(HealthRecord::probe_failure(
                        unit,
                        "error",
                        format!("probe task failed: {e}"),
                    ));
                }
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;

    use super::*;
    use crate::probe::ProbeError;

    /// Inspector that fails (or panics) for configured units.
    struct FlakyInspector {
        broken: HashSet<String>,
        panicking: HashSet<String>,
    }

    #[async_trait]
    impl Inspector for FlakyInspector {
        async fn liveness(&self, unit: &str) -> Result<String, ProbeError> {
            if self.panicking.contains(unit) {
                panic!("inspector blew up");
            }
            if self.broken.contains(unit) {
                return Err(ProbeError::Timeout);
            }
            Ok("active".to_string())
        }

        async fn properties(&self, _unit: &str) -> Result<String, ProbeError> {
            Ok("SubState=running".to_string())
        }

        async fn recent_logs(&self, _unit: &str, _lines: usize) -> Result<Vec<String>, ProbeError> {
            Ok(vec![])
        }
    }

    fn units(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn one_record_per_unit_despite_failures() {
        let checker = ParallelChecker::new(Arc::new(FlakyInspector {
            broken: HashSet::from(["b.service".to_string()]),
            panicking: HashSet::from(["c.service".to_string()]),
        }));
        let input = units(&["a.service", "b.service", "c.service", "d.service"]);
        let records = checker.check_all(&input).await;

        assert_eq!(records.len(), input.len());
        let by_unit: HashSet<_> = records.iter().map(|r| r.unit.as_str()).collect();
        for unit in &input {
            assert!(by_unit.contains(unit.as_str()));
        }

        let b = records.iter().find(|r| r.unit == "b.service").unwrap();
        assert!(b.is_offline());
        assert_eq!(b.status, "timeout");

        // the panicking unit still gets a placeholder record
        let c = records.iter().find(|r| r.unit == "c.service").unwrap();
        assert!(c.is_offline());
        assert!(c.error.as_deref().unwrap().contains("probe task failed"));

        let a = records.iter().find(|r| r.unit == "a.service").unwrap();
        assert!(a.active);
    }

    #[tokio::test]
    async fn empty_universe_yields_empty_batch() {
        let checker = ParallelChecker::new(Arc::new(FlakyInspector {
            broken: HashSet::new(),
            panicking: HashSet::new(),
        }));
        assert!(checker.check_all(&[]).await.is_empty());
    }
}
