//! KPI data-completeness check against the relational store.
//!
//! Every division is expected to have a KPI row for the current date; the
//! check reports the divisions that are missing one. No dedup or cooldown
//! applies here: each mismatched cycle re-alerts.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::warn;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KpiError {
    #[error("kpi store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of one completeness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessReport {
    pub complete: bool,
    /// Divisions with no data for the checked date.
    pub missing: Vec<String>,
}

/// Abstract view of the store: which divisions have data for a date.
#[async_trait]
pub trait KpiStore: Send + Sync {
    async fn divisions_with_data(&self, date: NaiveDate) -> Result<Vec<String>, KpiError>;
}

/// Postgres-backed store. The date column holds text in DD.MM.YYYY form,
/// matching the upstream loader.
pub struct PgKpiStore {
    pool: PgPool,
    excluded: Vec<String>,
}

impl PgKpiStore {
    pub async fn connect(url: &str, excluded: Vec<String>) -> Result<Self, KpiError> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool, excluded })
    }
}

#[async_trait]
impl KpiStore for PgKpiStore {
    async fn divisions_with_data(&self, date: NaiveDate) -> Result<Vec<String>, KpiError> {
        let date_key = date.format("%d.%m.%Y").to_string();
        let rows = sqlx::query(
            "SELECT DISTINCT division FROM kpi_rows \
             WHERE data = $1 AND NOT (division = ANY($2))",
        )
        .bind(&date_key)
        .bind(&self.excluded)
        .fetch_all(&self.pool)
        .await?;

        let mut divisions = Vec::with_capacity(rows.len());
        for row in rows {
            divisions.push(row.try_get::<String, _>("division")?);
        }
        Ok(divisions)
    }
}

/// Compare the store's divisions for `date` against the expected set.
///
/// A store error degrades to an incomplete report with no division detail;
/// the scheduler alerts on it and the next cycle retries.
pub async fn check_completeness(
    store: &dyn KpiStore,
    expected: &[String],
    date: NaiveDate,
) -> CompletenessReport {
    match store.divisions_with_data(date).await {
        Ok(found) => {
            let missing: Vec<String> = expected
                .iter()
                .filter(|div| !found.contains(div))
                .cloned()
                .collect();
            CompletenessReport {
                complete: missing.is_empty(),
                missing,
            }
        }
        Err(e) => {
            warn!("kpi completeness check failed: {e}");
            CompletenessReport {
                complete: false,
                missing: Vec::new(),
            }
        }
    }
}

/// Alert body for a mismatched cycle.
pub fn render_kpi_alert(missing: &[String]) -> String {
    let mut message = "⚠️ KPI date mismatch detected for the following divisions:\n".to_string();
    for division in missing {
        message.push_str(&format!("- {division}\n"));
    }
    message
}
