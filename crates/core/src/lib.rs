pub mod aggregate;
pub mod domain;
pub mod pipeline;
pub mod storage;
pub mod upstream;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://internship.cse.hcmut.edu.vn/home/company";
    pub const DEFAULT_CACHE_PATH: &str = "cache/companies.json";
    pub const DEFAULT_CACHE_EXPIRE_HOURS: u64 = 5;
    pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_UPSTREAM_RETRIES: u32 = 1;
    pub const MAX_UPSTREAM_RETRIES: u32 = 10;
    pub const DEFAULT_PORT: u16 = 3000;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub upstream_base_url: String,
        pub cache_path: PathBuf,
        pub cache_expire_hours: u64,
        pub upstream_timeout_secs: u64,
        pub upstream_retries: u32,
        pub sentry_dsn: Option<String>,
        pub port: u16,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let upstream_base_url = std::env::var("UPSTREAM_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string());

            let cache_path = std::env::var("CACHE_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH));

            let cache_expire_hours = parse_env("CACHE_EXPIRE_HOURS", DEFAULT_CACHE_EXPIRE_HOURS)?;
            anyhow::ensure!(cache_expire_hours > 0, "CACHE_EXPIRE_HOURS must be > 0");

            let upstream_timeout_secs =
                parse_env("UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;

            let upstream_retries = parse_env("UPSTREAM_RETRIES", DEFAULT_UPSTREAM_RETRIES)?;
            anyhow::ensure!(
                (1..=MAX_UPSTREAM_RETRIES).contains(&upstream_retries),
                "UPSTREAM_RETRIES must be 1..={MAX_UPSTREAM_RETRIES} (got {upstream_retries})"
            );

            let port = parse_env("PORT", DEFAULT_PORT)?;

            Ok(Self {
                upstream_base_url,
                cache_path,
                cache_expire_hours,
                upstream_timeout_secs,
                upstream_retries,
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                port,
            })
        }

        pub fn pipeline_config(&self) -> PipelineConfig {
            PipelineConfig {
                base_url: self.upstream_base_url.clone(),
                cache_window: Duration::from_secs(self.cache_expire_hours * 3600),
                cache_path: self.cache_path.clone(),
                upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
                upstream_retries: self.upstream_retries,
            }
        }
    }

    /// Everything the pipeline needs, resolved once at startup.
    #[derive(Debug, Clone)]
    pub struct PipelineConfig {
        /// Upstream root; `/all` and `/id/{id}` are appended to it.
        pub base_url: String,
        /// A cached snapshot younger than this is served without refetching.
        pub cache_window: Duration,
        pub cache_path: PathBuf,
        pub upstream_timeout: Duration,
        pub upstream_retries: u32,
    }

    impl Default for PipelineConfig {
        fn default() -> Self {
            Self {
                base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
                cache_window: Duration::from_secs(DEFAULT_CACHE_EXPIRE_HOURS * 3600),
                cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
                upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
                upstream_retries: DEFAULT_UPSTREAM_RETRIES,
            }
        }
    }

    fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} must be a number (got {s:?})")),
            _ => Ok(default),
        }
    }

}
