use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub scheduler: SchedulerSettings,
    pub pubmed: PubMedSettings,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BIOSOURCE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BIOSOURCE_PROFILE", "");
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            scheduler: SchedulerSettings::from_env_profiled(p),
            pubmed: PubMedSettings::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  postgres:    host={}, db={}, configured={}",
            self.postgres.host,
            self.postgres.database,
            self.postgres.is_configured()
        );
        tracing::info!(
            "  scheduler:   poll={}s, max_concurrent={}, strategy_timeout={}",
            self.scheduler.poll_interval_secs,
            self.scheduler.max_concurrent_jobs,
            match self.scheduler.strategy_timeout() {
                Some(t) => format!("{}s", t.as_secs()),
                None => "disabled".to_string(),
            }
        );
        tracing::info!(
            "  pubmed:      relevance_threshold={}, max_results={}",
            self.pubmed.default_relevance_threshold,
            self.pubmed.max_results
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "biosource"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between `run_due_jobs` polls.
    pub poll_interval_secs: u64,
    /// Due jobs executed at once. `1` runs them sequentially.
    pub max_concurrent_jobs: usize,
    /// Deadline for a single strategy call. `0` disables it.
    pub strategy_timeout_secs: u64,
}

impl SchedulerSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            poll_interval_secs: profiled_env_parse(p, "SCHEDULER_POLL_INTERVAL_SECS", 30),
            max_concurrent_jobs: profiled_env_parse(p, "SCHEDULER_MAX_CONCURRENT_JOBS", 1usize).max(1),
            strategy_timeout_secs: profiled_env_parse(p, "SCHEDULER_STRATEGY_TIMEOUT_SECS", 900),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn strategy_timeout(&self) -> Option<Duration> {
        (self.strategy_timeout_secs > 0).then(|| Duration::from_secs(self.strategy_timeout_secs))
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_concurrent_jobs: 1,
            strategy_timeout_secs: 900,
        }
    }
}

// ── PubMed ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubMedSettings {
    /// Applied when a source config omits `relevance_threshold`.
    pub default_relevance_threshold: f64,
    /// Upper bound on records requested per run.
    pub max_results: u32,
}

impl PubMedSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            default_relevance_threshold: profiled_env_parse(p, "PUBMED_DEFAULT_RELEVANCE_THRESHOLD", 0.0),
            max_results: profiled_env_parse(p, "PUBMED_MAX_RESULTS", 100),
        }
    }
}

impl Default for PubMedSettings {
    fn default() -> Self {
        Self {
            default_relevance_threshold: 0.0,
            max_results: 100,
        }
    }
}
