use anyhow::{Context, bail};
use graph::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: OperationMode,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub budget: ErrorBudgetConfig,
    /// Mentions and relationships below this are skipped, not counted as errors.
    pub min_confidence: f64,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Wide fan-out, short timeouts, few retries
    Accurate,  // Narrow fan-out, patient retries, confidence floor
    #[default]
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
    pub request_timeout_secs: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBudgetConfig {
    /// Run aborts once failures / attempted items exceeds this.
    pub max_failure_rate: f64,
    /// Items attempted before the rate is evaluated at all.
    pub min_samples: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 5,
            request_timeout_secs: 60,
            channel_capacity: 32,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for ErrorBudgetConfig {
    fn default() -> Self {
        Self {
            max_failure_rate: 0.5,
            min_samples: 20,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            budget: ErrorBudgetConfig::default(),
            min_confidence: 0.0,
            resolver: ResolverConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 20,
                request_timeout_secs: 30,
                channel_capacity: 128,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 3,
                request_timeout_secs: 120,
                channel_capacity: 16,
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            min_confidence: 0.7,
            ..Self::default()
        }
    }

    /// Load a TOML file; missing sections fall back to defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency.max_concurrent_extractions == 0 {
            bail!("concurrency.max_concurrent_extractions must be at least 1");
        }
        if self.concurrency.channel_capacity == 0 {
            bail!("concurrency.channel_capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min_confidence must lie in [0, 1], got {}", self.min_confidence);
        }
        if !(0.0..=1.0).contains(&self.budget.max_failure_rate) {
            bail!(
                "budget.max_failure_rate must lie in [0, 1], got {}",
                self.budget.max_failure_rate
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
        .with_attempt_timeout(self.request_timeout())
    }
}
