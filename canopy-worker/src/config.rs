//! Worker configuration
//!
//! Command line arguments (with environment fallbacks) and the validated
//! runtime configuration derived from them.

use std::time::Duration;

use canopy_core::retry::RetryPolicy;
use clap::Parser;

/// Drains one pipeline's queue and runs each unit on a live processing service
#[derive(Debug, Clone, Parser)]
#[command(name = "canopy-worker", version, about)]
pub struct Args {
    /// Pipeline whose queue this worker consumes
    pub pipeline: String,

    /// Orchestrator base URL
    #[arg(
        long,
        env = "CANOPY_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    pub orchestrator_url: String,

    /// Identifier reported with every lease (defaults to worker-<pid>)
    #[arg(long, env = "CANOPY_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Consumer loops sharing the worker thread
    #[arg(long, env = "CANOPY_WORKER_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Seconds to wait after an empty lease
    #[arg(long, default_value_t = 2)]
    pub poll_interval: u64,

    /// Seconds allowed for one `/process` call
    #[arg(long, default_value_t = 300)]
    pub inference_timeout: u64,

    /// Attempts per unit, including the first
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Backoff before the second attempt, in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_base_delay: u64,

    /// Upper bound on the retry backoff, in seconds
    #[arg(long, default_value_t = 60)]
    pub retry_max_delay: u64,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    pub worker_id: String,

    /// Number of consumer loops
    pub concurrency: usize,

    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,

    pub inference_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Config {
    /// Creates a configuration with defaults for `pipeline`
    pub fn new(pipeline: String, orchestrator_url: String) -> Self {
        Self {
            pipeline,
            orchestrator_url,
            worker_id: default_worker_id(),
            concurrency: 1,
            poll_interval: Duration::from_secs(2),
            inference_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.is_empty() {
            anyhow::bail!("pipeline cannot be empty");
        }

        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.inference_timeout.is_zero() {
            anyhow::bail!("inference_timeout must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        if self.retry.base_delay > self.retry.max_delay {
            anyhow::bail!("retry_base_delay cannot exceed retry_max_delay");
        }

        Ok(())
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            pipeline: args.pipeline,
            orchestrator_url: args.orchestrator_url,
            worker_id: args.worker_id.unwrap_or_else(default_worker_id),
            concurrency: args.concurrency,
            poll_interval: Duration::from_secs(args.poll_interval),
            inference_timeout: Duration::from_secs(args.inference_timeout),
            retry: RetryPolicy {
                max_attempts: args.max_attempts,
                base_delay: Duration::from_secs(args.retry_base_delay),
                max_delay: Duration::from_secs(args.retry_max_delay),
            },
        }
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}
