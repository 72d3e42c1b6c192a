use crate::config::PipelineConfig;
use crate::domain::company::{CompanyDetail, CompanyRef};
use crate::upstream::types::{CompanyDetailResponse, CompanyListResponse};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_MAX_MS: u64 = 8_000;

/// Read access to the upstream company listing.
///
/// Implementations absorb every failure: a broken list call is an empty list and
/// a broken detail call is `None`. Callers never see transport errors.
#[async_trait::async_trait]
pub trait CompanySource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn list_companies(&self) -> Vec<CompanyRef>;

    async fn company_detail(&self, id: &str) -> Option<CompanyDetail>;
}

#[derive(Debug, Clone)]
pub struct HttpCompanySource {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl HttpCompanySource {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .context("failed to build upstream http client")?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            retries: config.upstream_retries.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_once<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        // Fresh value per request so intermediaries never hand back a cached body.
        let nocache = uuid::Uuid::new_v4().simple().to_string();

        let res = self
            .http
            .get(url)
            .query(&[("nocache", nocache)])
            .send()
            .await
            .context("upstream request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read upstream response")?;

        if !status.is_success() {
            anyhow::bail!("upstream HTTP {status}: {text}");
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("upstream response has unexpected shape: {text}"))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(url).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, %url, error = %err, "upstream fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Delay after failed attempt `attempt` (1-based): doubles from 250ms, capped at 8s.
fn retry_backoff(attempt: u32) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_MAX_MS))
}

#[async_trait::async_trait]
impl CompanySource for HttpCompanySource {
    fn source_name(&self) -> &'static str {
        "upstream_http_json"
    }

    async fn list_companies(&self) -> Vec<CompanyRef> {
        let url = self.url("all");
        match self.fetch_json::<CompanyListResponse>(&url).await {
            Ok(resp) => resp.items.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(%url, error = %format!("{err:#}"), "company list fetch failed; treating as empty");
                Vec::new()
            }
        }
    }

    async fn company_detail(&self, id: &str) -> Option<CompanyDetail> {
        let url = self.url(&format!("id/{id}"));
        match self.fetch_json::<CompanyDetailResponse>(&url).await {
            Ok(resp) => {
                if resp.item.is_none() {
                    tracing::debug!(company_id = %id, "upstream has no detail for company");
                }
                resp.item
            }
            Err(err) => {
                tracing::warn!(company_id = %id, error = %format!("{err:#}"), "company detail fetch failed; skipping");
                None
            }
        }
    }
}
