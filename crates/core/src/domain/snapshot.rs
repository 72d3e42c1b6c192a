use crate::domain::company::CompanySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Number of companies in the upstream list, including failed lookups.
    pub total_companies: usize,
    /// Details that carried both acceptance counters.
    pub valid_company_count: usize,
    pub total_student_accepted: i64,
    pub total_max_accepted_student: i64,
    pub total_student_register: i64,
    pub total_max_register: i64,
    /// Four decimals, e.g. `"0.6250"`.
    pub acceptance_ratio: String,
    pub register_ratio: String,
    /// Two decimals plus `%`, e.g. `"62.50%"`.
    pub acceptance_percentage: String,
    pub register_percentage: String,
    pub summary: String,
}

/// One aggregated result. The unit that gets cached and served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub available_companies: Vec<CompanySummary>,
    pub all_companies_details: Vec<CompanySummary>,
    pub acceptance_stats: AggregateStats,
    pub last_updated: DateTime<Utc>,
}

impl Snapshot {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_updated
    }

    /// Fresh iff strictly younger than `window`. A timestamp in the future counts as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => self.age(now) < window,
            Err(_) => true,
        }
    }
}
