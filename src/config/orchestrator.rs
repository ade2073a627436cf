//! Orchestrator configuration: resource capacities, worker count, retry and
//! cancellation timing.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;
use crate::core::retry::RetryPolicy;

/// Handler retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum handler invocations per task, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Policy described by this configuration.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

/// Root orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Capacity per resource kind.
    pub resources: BTreeMap<String, u32>,
    /// Number of worker threads.
    pub worker_count: usize,
    /// Handler retry settings.
    pub retry: RetryConfig,
    /// How long a cancelled or timed-out handler may take to wind down.
    pub cancel_grace_ms: u64,
    /// Idle workers sweep expired tasks at this interval.
    pub expiry_sweep_ms: u64,
    /// Events kept by the default in-memory audit sink.
    pub audit_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            resources: BTreeMap::from([(
                "compute".to_string(),
                u32::try_from(cpus).unwrap_or(u32::MAX),
            )]),
            worker_count: cpus,
            retry: RetryConfig::default(),
            cancel_grace_ms: 1_000,
            expiry_sweep_ms: 250,
            audit_capacity: 1_024,
        }
    }
}

impl OrchestratorConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all resource capacities.
    #[must_use]
    pub fn with_resources<I, K>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: Into<String>,
    {
        self.resources = resources.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    /// Set the capacity of one resource kind.
    #[must_use]
    pub fn with_resource(mut self, kind: impl Into<String>, capacity: u32) -> Self {
        self.resources.insert(kind.into(), capacity);
        self
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the retry settings.
    #[must_use]
    pub const fn with_retry(
        mut self,
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
    ) -> Self {
        self.retry = RetryConfig {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
        };
        self
    }

    /// Set the cancellation grace period.
    #[must_use]
    pub const fn with_cancel_grace_ms(mut self, cancel_grace_ms: u64) -> Self {
        self.cancel_grace_ms = cancel_grace_ms;
        self
    }

    /// Set the expiry sweep interval.
    #[must_use]
    pub const fn with_expiry_sweep_ms(mut self, expiry_sweep_ms: u64) -> Self {
        self.expiry_sweep_ms = expiry_sweep_ms;
        self
    }

    /// Set the audit ring size.
    #[must_use]
    pub const fn with_audit_capacity(mut self, audit_capacity: usize) -> Self {
        self.audit_capacity = audit_capacity;
        self
    }

    /// Cancellation grace period.
    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Expiry sweep interval.
    #[must_use]
    pub const fn expiry_sweep(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.resources.is_empty() {
            return Err("at least one resource kind must be defined".into());
        }
        for (kind, &capacity) in &self.resources {
            if kind.trim().is_empty() {
                return Err("resource kind names must not be empty".into());
            }
            if capacity == 0 {
                return Err(format!("capacity of `{kind}` must be greater than 0"));
            }
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be greater than 0".into());
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err("retry.max_backoff_ms must be >= retry.initial_backoff_ms".into());
        }
        if self.expiry_sweep_ms == 0 {
            return Err("expiry_sweep_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed, or validated.
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading orchestrator config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading orchestrator config {}", path.display()))
    }

    /// Build configuration from the environment, loading `.env` first.
    ///
    /// `ORCHESTRATOR_CONFIG` names a JSON file used as the base; the
    /// following variables override it:
    ///
    /// * `ORCHESTRATOR_RESOURCES`, e.g. `compute=4,memory=1024`
    /// * `ORCHESTRATOR_WORKERS`
    /// * `ORCHESTRATOR_MAX_ATTEMPTS`
    /// * `ORCHESTRATOR_CANCEL_GRACE_MS`
    ///
    /// # Errors
    ///
    /// Fails on an unreadable base file, an unparsable variable, or an
    /// invalid result.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("ORCHESTRATOR_CONFIG") {
            Ok(path) => Self::from_path(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(raw) = std::env::var("ORCHESTRATOR_RESOURCES") {
            cfg.resources = parse_resources(&raw).map_err(anyhow::Error::msg)?;
        }
        if let Ok(raw) = std::env::var("ORCHESTRATOR_WORKERS") {
            cfg.worker_count = raw.parse::<usize>().context("ORCHESTRATOR_WORKERS")?;
        }
        if let Ok(raw) = std::env::var("ORCHESTRATOR_MAX_ATTEMPTS") {
            cfg.retry.max_attempts = raw.parse::<u32>().context("ORCHESTRATOR_MAX_ATTEMPTS")?;
        }
        if let Ok(raw) = std::env::var("ORCHESTRATOR_CANCEL_GRACE_MS") {
            cfg.cancel_grace_ms = raw.parse::<u64>().context("ORCHESTRATOR_CANCEL_GRACE_MS")?;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

/// Parse `kind=capacity` pairs separated by commas.
///
/// # Errors
///
/// Returns a message naming the malformed entry.
pub fn parse_resources(raw: &str) -> Result<BTreeMap<String, u32>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (kind, capacity) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected kind=capacity, got `{entry}`"))?;
            let capacity = capacity
                .trim()
                .parse::<u32>()
                .map_err(|e| format!("bad capacity in `{entry}`: {e}"))?;
            Ok((kind.trim().to_string(), capacity))
        })
        .collect()
}
