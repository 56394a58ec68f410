use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt<F>(lookup: &F, profile: &str, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed) {
            return Some(v);
        }
    }
    lookup(key)
}

fn profiled_parse<F, T>(lookup: &F, profile: &str, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    profiled_opt(lookup, profile, key).and_then(|v| v.trim().parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TICKLOOM_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_opt("TICKLOOM_PROFILE").unwrap_or_default();
        Self::from_lookup(&profile, env_opt)
    }

    /// Build config for a named profile from an arbitrary key source.
    pub fn from_lookup<F>(profile: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            profile: profile.to_uppercase(),
            scheduler: SchedulerConfig::default(),
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.profile = config.profile.to_uppercase();
        config.apply_overrides(env_opt);
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = self.profile.clone();
        let s = &mut self.scheduler;
        if let Some(v) = profiled_parse(&lookup, &p, "TICKLOOM_PARALLELISM") {
            s.parallelism = v;
        }
        if let Some(v) = profiled_parse(&lookup, &p, "TICKLOOM_SHUTDOWN_TIMEOUT_SECS") {
            s.shutdown_timeout_secs = v;
        }
        if let Some(v) = profiled_parse(&lookup, &p, "TICKLOOM_TICKS_PER_SECOND") {
            s.ticks_per_second = v;
        }
        if let Some(v) = profiled_opt(&lookup, &p, "TICKLOOM_WORKER_PREFIX") {
            s.worker_name_prefix = v;
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   parallelism={} (resolved {}), shutdown_timeout={}s",
            self.scheduler.parallelism,
            self.scheduler.resolved_parallelism(),
            self.scheduler.shutdown_timeout_secs
        );
        tracing::info!(
            "  host:        ticks_per_second={}, worker_prefix={}",
            self.scheduler.ticks_per_second,
            self.scheduler.worker_name_prefix
        );
    }

    /// Return a JSON view of the resolved configuration.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "scheduler": {
                "parallelism": self.scheduler.resolved_parallelism(),
                "shutdown_timeout_secs": self.scheduler.shutdown_timeout_secs,
                "ticks_per_second": self.scheduler.ticks_per_second,
                "worker_name_prefix": self.scheduler.worker_name_prefix,
            },
        })
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Scheduler configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = max(4, available parallelism).
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// How long `shutdown` waits for in-flight async work, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Host tick rate, used by the clock time source and unit conversions.
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,
    /// Worker thread name prefix, suffixed with the worker index.
    #[serde(default = "default_worker_name_prefix")]
    pub worker_name_prefix: String,
}

fn default_parallelism() -> usize { 0 }
fn default_shutdown_timeout() -> u64 { 20 }
fn default_ticks_per_second() -> u32 { 60 }
fn default_worker_name_prefix() -> String { "tickloom-worker-".into() }

/// Lower bound applied when the worker count is auto-detected.
const MIN_AUTO_PARALLELISM: usize = 4;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            ticks_per_second: default_ticks_per_second(),
            worker_name_prefix: default_worker_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve worker thread count (0 means max(4, available parallelism)).
    pub fn resolved_parallelism(&self) -> usize {
        if self.parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_AUTO_PARALLELISM)
                .max(MIN_AUTO_PARALLELISM)
        } else {
            self.parallelism
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Wall-clock length of one host tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(ConfigError::Invalid("ticks_per_second must be positive".into()));
        }
        if self.worker_name_prefix.is_empty() {
            return Err(ConfigError::Invalid("worker_name_prefix must not be empty".into()));
        }
        Ok(())
    }
}
