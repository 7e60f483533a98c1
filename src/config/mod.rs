use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::services::cache::CacheSettings;
use crate::services::ebird::{Credentials, EbirdSettings};
use crate::services::fetch::FetchSettings;
use crate::services::worker::PoolSettings;

#[derive(Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// eBird account used for the shared session
    pub ebird_username: String,
    pub ebird_password: String,

    #[serde(default = "default_ebird_base_url")]
    pub ebird_base_url: String,

    /// Cornell CAS login page for eBird
    #[serde(default = "default_ebird_login_url")]
    pub ebird_login_url: String,

    /// Where session cookies are persisted between restarts
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,

    /// Per-request HTTP timeout against eBird
    #[serde(default = "default_ebird_request_timeout_secs")]
    pub ebird_request_timeout_secs: u64,

    /// eBird taxonomy CSV; species enrichment is skipped when unset
    pub taxonomy_file: Option<PathBuf>,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Max concurrent requests to eBird across all workers
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,

    /// First retry delay; doubled on each further attempt
    #[serde(default = "default_fetch_backoff_secs")]
    pub fetch_backoff_secs: u64,

    #[serde(default = "default_session_freshness_secs")]
    pub session_freshness_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("ebird_username", &self.ebird_username)
            .field("ebird_password", &"<redacted>")
            .field("ebird_base_url", &self.ebird_base_url)
            .field("session_file", &self.session_file)
            .field("taxonomy_file", &self.taxonomy_file)
            .field("worker_count", &self.worker_count)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .finish_non_exhaustive()
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_ebird_base_url() -> String {
    "https://ebird.org".to_string()
}

fn default_ebird_login_url() -> String {
    "https://secure.birds.cornell.edu/cassso/login?service=https://ebird.org/login/cas?portal=ebird"
        .to_string()
}

fn default_session_file() -> PathBuf {
    PathBuf::from("ebird_session.json")
}

fn default_ebird_request_timeout_secs() -> u64 {
    30
}

fn default_worker_count() -> usize {
    40
}

fn default_job_timeout_secs() -> u64 {
    300
}

fn default_fetch_concurrency() -> usize {
    2
}

fn default_fetch_max_attempts() -> u32 {
    3
}

fn default_fetch_backoff_secs() -> u64 {
    2
}

fn default_session_freshness_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    50
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn ebird_settings(&self) -> EbirdSettings {
        EbirdSettings {
            base_url: self.ebird_base_url.clone(),
            login_url: self.ebird_login_url.clone(),
            credentials: Credentials {
                username: self.ebird_username.clone(),
                password: self.ebird_password.clone(),
            },
            session_file: self.session_file.clone(),
            request_timeout: Duration::from_secs(self.ebird_request_timeout_secs),
        }
    }

    pub fn session_freshness(&self) -> Duration {
        Duration::from_secs(self.session_freshness_secs)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            workers: self.worker_count,
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            retention: Duration::from_secs(self.job_retention_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            concurrency: self.fetch_concurrency,
            max_attempts: self.fetch_max_attempts,
            base_backoff: Duration::from_secs(self.fetch_backoff_secs),
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            capacity: self.cache_capacity,
        }
    }
}
