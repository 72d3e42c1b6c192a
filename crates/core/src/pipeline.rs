//! Cache-or-fetch pipeline behind `GET /api/companies`.
//!
//! ```text
//! read cache ── fresh ──────────────────────────────────────────► serve cached
//!     │
//!     └─ miss/stale ─► list ─ empty ─► NoData
//!                        │
//!                        └─► details (fan-out, wait for all) ─► aggregate ─► serve
//!                                                                   └─► spawn cache write
//! ```

use crate::aggregate::aggregate;
use crate::config::PipelineConfig;
use crate::domain::company::CompanyDetail;
use crate::domain::snapshot::Snapshot;
use crate::storage::cache::{SnapshotCache, WriteOutcome};
use crate::upstream::{CompanySource, HttpCompanySource};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The upstream list was empty (or unreachable, which looks the same).
    #[error("no company data")]
    NoData,

    #[error("internal failure: {0:#}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Upstream,
}

#[derive(Debug)]
pub struct Served {
    pub snapshot: Snapshot,
    pub origin: Origin,
    /// Background cache write started for an upstream result. Dropping the handle
    /// detaches the task; it keeps running.
    pub persist: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn CompanySource>,
    cache: Arc<SnapshotCache>,
    cache_window: Duration,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> anyhow::Result<Self> {
        let source = HttpCompanySource::from_config(config)?;
        Ok(Self::with_source(config, Arc::new(source)))
    }

    pub fn with_source(config: &PipelineConfig, source: Arc<dyn CompanySource>) -> Self {
        Self {
            source,
            cache: Arc::new(SnapshotCache::new(config.cache_path.clone())),
            cache_window: config.cache_window,
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Cached snapshot if one exists and is younger than the cache window.
    pub async fn cached_fresh(&self) -> Option<Snapshot> {
        let snapshot = self.cache.read().await?;
        let now = Utc::now();
        if snapshot.is_fresh(now, self.cache_window) {
            Some(snapshot)
        } else {
            tracing::info!(
                last_updated = %snapshot.last_updated,
                age_secs = snapshot.age(now).num_seconds(),
                "cached snapshot is stale"
            );
            None
        }
    }

    pub async fn run(&self) -> Result<Served, PipelineError> {
        if let Some(snapshot) = self.cached_fresh().await {
            tracing::debug!(last_updated = %snapshot.last_updated, "serving cached snapshot");
            return Ok(Served {
                snapshot,
                origin: Origin::Cache,
                persist: None,
            });
        }

        // Run the fetch on its own task so a panic anywhere in it surfaces as an
        // error here instead of tearing down the caller.
        let this = self.clone();
        let snapshot = tokio::spawn(async move { this.refresh().await })
            .await
            .map_err(|e| anyhow::anyhow!("refresh task failed: {e}"))??;

        let persist = self.spawn_persist(snapshot.clone());

        Ok(Served {
            snapshot,
            origin: Origin::Upstream,
            persist: Some(persist),
        })
    }

    /// Fetches the list and every detail, then aggregates. Never touches the cache.
    pub async fn refresh(&self) -> Result<Snapshot, PipelineError> {
        let started = std::time::Instant::now();

        let companies = self.source.list_companies().await;
        if companies.is_empty() {
            tracing::warn!(source = self.source.source_name(), "upstream returned no companies");
            return Err(PipelineError::NoData);
        }

        let tasks: Vec<JoinHandle<Option<CompanyDetail>>> = companies
            .iter()
            .map(|company| {
                let source = Arc::clone(&self.source);
                let id = company.id.clone();
                tokio::spawn(async move { source.company_detail(&id).await })
            })
            .collect();

        let details: Vec<Option<CompanyDetail>> = join_all(tasks)
            .await
            .into_iter()
            .zip(&companies)
            .map(|(res, company)| match res {
                Ok(detail) => detail,
                Err(err) => {
                    tracing::error!(company_id = %company.id, error = %err, "detail task failed; skipping company");
                    None
                }
            })
            .collect();

        let snapshot = aggregate(&details, Utc::now());
        let stats = &snapshot.acceptance_stats;

        tracing::info!(
            source = self.source.source_name(),
            total_companies = stats.total_companies,
            details = snapshot.all_companies_details.len(),
            valid_companies = stats.valid_company_count,
            available = snapshot.available_companies.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "refreshed company snapshot"
        );

        Ok(snapshot)
    }

    /// Writes `snapshot` to the cache on a detached task. The outcome is only logged.
    pub fn spawn_persist(&self, snapshot: Snapshot) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            match cache.write(&snapshot).await {
                Ok(WriteOutcome::Written) => {
                    tracing::debug!(last_updated = %snapshot.last_updated, path = %cache.path().display(), "cached snapshot written");
                }
                Ok(WriteOutcome::SkippedStale) => {}
                Err(err) => {
                    tracing::error!(path = %cache.path().display(), error = %format!("{err:#}"), "cache write failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::company::CompanyRef;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeSource {
        ids: Vec<String>,
        details: HashMap<String, CompanyDetail>,
        panic_on: Option<String>,
        list_calls: AtomicUsize,
        detail_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CompanySource for FakeSource {
        fn source_name(&self) -> &'static str {
            "fake"
        }

        async fn list_companies(&self) -> Vec<CompanyRef> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.ids
                .iter()
                .map(|id| CompanyRef { id: id.clone() })
                .collect()
        }

        async fn company_detail(&self, id: &str) -> Option<CompanyDetail> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on.as_deref() == Some(id) {
                panic!("detail lookup blew up for {id}");
            }
            self.details.get(id).cloned()
        }
    }

    fn acme() -> CompanyDetail {
        CompanyDetail {
            fullname: "Acme".to_string(),
            shortname: "ACM".to_string(),
            student_register: Some(10),
            max_register: Some(20),
            student_accepted: Some(5),
            max_accepted_student: Some(5),
        }
    }

    fn open_slots() -> CompanyDetail {
        CompanyDetail {
            fullname: "Open".to_string(),
            shortname: "OPN".to_string(),
            student_register: Some(1),
            max_register: Some(4),
            student_accepted: Some(1),
            max_accepted_student: Some(3),
        }
    }

    fn acme_and_missing() -> FakeSource {
        FakeSource {
            ids: vec!["A".to_string(), "B".to_string()],
            details: HashMap::from([("A".to_string(), acme())]),
            ..Default::default()
        }
    }

    fn setup(source: FakeSource) -> (Pipeline, Arc<FakeSource>, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = PipelineConfig {
            cache_path: dir.path().join("companies.json"),
            ..Default::default()
        };
        let source = Arc::new(source);
        let pipeline = Pipeline::with_source(&config, source.clone());
        (pipeline, source, dir)
    }

    #[tokio::test]
    async fn cold_cache_fetches_aggregates_and_persists() {
        let (pipeline, source, _dir) = setup(acme_and_missing());

        let served = pipeline.run().await.unwrap();
        assert_eq!(served.origin, Origin::Upstream);

        let s = &served.snapshot;
        let stats = &s.acceptance_stats;
        assert_eq!(s.all_companies_details.len(), 1);
        assert_eq!(s.all_companies_details[0].fullname, "Acme");
        assert!(s.available_companies.is_empty());
        assert_eq!(stats.total_student_accepted, 5);
        assert_eq!(stats.total_max_accepted_student, 5);
        assert_eq!(stats.acceptance_ratio, "1.0000");
        assert_eq!(stats.valid_company_count, 1);
        assert_eq!(stats.total_companies, 2);
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 2);

        served.persist.unwrap().await.unwrap();
        assert_eq!(pipeline.cache().read().await.as_ref(), Some(&served.snapshot));
    }

    #[tokio::test]
    async fn empty_list_is_no_data_and_leaves_cache_untouched() {
        let (pipeline, source, _dir) = setup(FakeSource::default());

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::NoData));
        assert_eq!(err.to_string(), "no company data");
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 0);
        assert!(!pipeline.cache().path().exists());
    }

    #[tokio::test]
    async fn empty_list_keeps_existing_stale_cache() {
        let (pipeline, _source, _dir) = setup(FakeSource::default());
        let mut stale = aggregate(&[Some(acme())], Utc::now());
        stale.last_updated = Utc::now() - ChronoDuration::hours(6);
        pipeline.cache().write(&stale).await.unwrap();

        assert!(matches!(pipeline.run().await, Err(PipelineError::NoData)));
        assert_eq!(pipeline.cache().read().await, Some(stale));
    }

    #[tokio::test]
    async fn fresh_cache_is_served_without_fetching() {
        let (pipeline, source, _dir) = setup(acme_and_missing());
        let mut cached = aggregate(&[Some(open_slots())], Utc::now());
        cached.last_updated = Utc::now() - ChronoDuration::hours(4) - ChronoDuration::minutes(59);
        pipeline.cache().write(&cached).await.unwrap();

        let served = pipeline.run().await.unwrap();

        assert_eq!(served.origin, Origin::Cache);
        assert!(served.persist.is_none());
        assert_eq!(served.snapshot, cached);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_cache_triggers_full_refresh() {
        let (pipeline, source, _dir) = setup(acme_and_missing());
        let mut cached = aggregate(&[Some(open_slots())], Utc::now());
        cached.last_updated = Utc::now() - ChronoDuration::hours(5) - ChronoDuration::minutes(1);
        pipeline.cache().write(&cached).await.unwrap();

        let served = pipeline.run().await.unwrap();

        assert_eq!(served.origin, Origin::Upstream);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(served.snapshot.all_companies_details[0].fullname, "Acme");
        assert!(served.snapshot.last_updated > cached.last_updated);

        served.persist.unwrap().await.unwrap();
        assert_eq!(pipeline.cache().read().await, Some(served.snapshot));
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let (pipeline, source, _dir) = setup(acme_and_missing());

        let first = pipeline.run().await.unwrap();
        first.persist.unwrap().await.unwrap();
        let second = pipeline.run().await.unwrap();

        assert_eq!(second.origin, Origin::Cache);
        assert_eq!(second.snapshot, first.snapshot);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_detail_lookup_counts_as_absent() {
        let mut source = acme_and_missing();
        source.details.insert("B".to_string(), open_slots());
        source.panic_on = Some("B".to_string());
        let (pipeline, _source, _dir) = setup(source);

        let snapshot = pipeline.refresh().await.unwrap();

        assert_eq!(snapshot.acceptance_stats.total_companies, 2);
        assert_eq!(snapshot.all_companies_details.len(), 1);
    }

    /// Holds every detail lookup at a barrier sized to the company count, so the
    /// lookups can only finish if all of them are in flight at once.
    struct GatedSource {
        ids: Vec<String>,
        barrier: tokio::sync::Barrier,
        late_id: String,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        completed: AtomicUsize,
    }

    impl GatedSource {
        fn new(n: usize, late_id: &str) -> Self {
            Self {
                ids: (0..n).map(|i| format!("c{i}")).collect(),
                barrier: tokio::sync::Barrier::new(n),
                late_id: late_id.to_string(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl CompanySource for GatedSource {
        fn source_name(&self) -> &'static str {
            "gated"
        }

        async fn list_companies(&self) -> Vec<CompanyRef> {
            self.ids
                .iter()
                .map(|id| CompanyRef { id: id.clone() })
                .collect()
        }

        async fn company_detail(&self, id: &str) -> Option<CompanyDetail> {
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            self.barrier.wait().await;
            if id == self.late_id {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Some(CompanyDetail {
                fullname: id.to_string(),
                student_accepted: Some(0),
                max_accepted_student: Some(1),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn detail_lookups_run_concurrently_and_all_are_awaited() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            cache_path: dir.path().join("companies.json"),
            ..Default::default()
        };
        let source = Arc::new(GatedSource::new(8, "c5"));
        let pipeline = Pipeline::with_source(&config, source.clone());

        let snapshot = tokio::time::timeout(Duration::from_secs(5), pipeline.refresh())
            .await
            .expect("detail lookups were not issued concurrently")
            .unwrap();

        assert_eq!(source.peak_in_flight.load(Ordering::SeqCst), 8);
        assert_eq!(source.completed.load(Ordering::SeqCst), 8);
        assert_eq!(snapshot.all_companies_details.len(), 8);
        assert_eq!(snapshot.acceptance_stats.valid_company_count, 8);
        assert!(snapshot
            .all_companies_details
            .iter()
            .any(|c| c.fullname == "c5"));
    }

    #[tokio::test]
    async fn refresh_does_not_write_cache() {
        let (pipeline, _source, _dir) = setup(acme_and_missing());

        pipeline.refresh().await.unwrap();
        assert!(pipeline.cache().read().await.is_none());
    }

    #[tokio::test]
    async fn failed_persist_does_not_affect_response() {
        let (pipeline, _source, _dir) = setup(acme_and_missing());
        std::fs::create_dir_all(pipeline.cache().path()).unwrap();

        let served = pipeline.run().await.unwrap();
        assert_eq!(served.origin, Origin::Upstream);
        served.persist.unwrap().await.unwrap();
        assert_eq!(served.snapshot.acceptance_stats.total_companies, 2);
    }
}
