//! Run configuration and rubric metrics.
//!
//! All behaviour of a run is controlled through [`RunConfig`], loaded once at
//! start-up and immutable for the run's duration. Keeping every knob in one
//! struct makes it trivial to share the config across workers, serialise it
//! for logging, and diff two runs to understand why their outputs differ.
//!
//! There is no module-level or global configuration state anywhere in the
//! crate: the config value is constructed here and threaded explicitly into
//! every component's constructor.
//!
//! Two sources are supported: a JSON file ([`RunConfig::from_file`], the
//! usual CLI path) and a builder ([`RunConfig::builder`]) for library
//! callers that set only what they care about.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for one rephrasing run.
///
/// # Example
/// ```rust
/// use pdf_rephrase::RunConfig;
///
/// let config = RunConfig::builder()
///     .chunk_size(800)
///     .max_attempts(3)
///     .model_name("mistral")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Target character size of a split piece. Default: 1000.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Character overlap carried between consecutive pieces. Default: 100.
    ///
    /// The overlap trades duplication for preserved context across a cut:
    /// a sentence severed at a piece boundary still appears whole in one of
    /// the two pieces.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Token ceiling a chunk must stay under. Default: 512.
    ///
    /// Counted with the tokenizer for [`RunConfig::tokenizer_model`], which
    /// must match the generation model or the budget is meaningless.
    #[serde(default = "default_max_tokens_check")]
    pub max_tokens_check: usize,

    /// Hugging Face model id whose tokenizer counts the budget,
    /// e.g. "mistralai/Mistral-7B-v0.1".
    pub tokenizer_model: String,

    /// Generation model id sent to the backend, e.g. "mistral".
    pub model_name: String,

    /// Sampling temperature for generation. Default: 0.1.
    ///
    /// Low temperature keeps the rewrite faithful to the source text;
    /// higher values introduce creativity that the evaluator then rejects.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens the model may generate per request. Default: 2000.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Rephrase/evaluate attempts per chunk before falling back to the best
    /// scored attempt. Default: 5.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Width of the chunk worker pool. Default: 4.
    ///
    /// The backend is network-bound; four concurrent chunk pipelines keep it
    /// busy without starving a locally hosted model of memory.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Extra transport retries per generation request. Default: 2.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,

    /// Fixed delay between transport retries, in milliseconds. Default: 5000.
    #[serde(default = "default_transport_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,

    /// Fixed delay between rephrase attempts of one chunk, in milliseconds.
    /// Default: 3000.
    #[serde(default = "default_attempt_delay_ms")]
    pub attempt_delay_ms: u64,

    /// Per-request timeout in seconds. Default: 120.
    ///
    /// Local models can take well over a minute on long prompts; a timeout
    /// under that converts slow answers into spurious transport errors.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Generation endpoint URL. If absent, the `REPHRASE_API_URL`
    /// environment variable is consulted at backend construction.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_max_tokens_check() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> usize {
    2000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_concurrency() -> usize {
    4
}
fn default_transport_retries() -> u32 {
    2
}
fn default_transport_retry_delay_ms() -> u64 {
    5000
}
fn default_attempt_delay_ms() -> u64 {
    3000
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_tokens_check: default_max_tokens_check(),
            tokenizer_model: "mistralai/Mistral-7B-v0.1".to_string(),
            model_name: "mistral".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
            transport_retries: default_transport_retries(),
            transport_retry_delay_ms: default_transport_retry_delay_ms(),
            attempt_delay_ms: default_attempt_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            endpoint: None,
        }
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| PipelineError::ConfigNotFound {
            path: path.to_path_buf(),
        })?;
        let config: RunConfig =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ConfigInvalid {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate().map_err(|detail| PipelineError::ConfigInvalid {
            path: path.to_path_buf(),
            detail,
        })?;
        Ok(config)
    }

    /// Delay between transport retries.
    pub fn transport_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transport_retry_delay_ms)
    }

    /// Delay between rephrase attempts.
    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be ≥ 1".into());
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.max_tokens_check == 0 {
            return Err("max_tokens_check must be ≥ 1".into());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be ≥ 1".into());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be ≥ 1".into());
        }
        if self.tokenizer_model.is_empty() {
            return Err("tokenizer_model must not be empty".into());
        }
        if self.model_name.is_empty() {
            return Err("model_name must not be empty".into());
        }
        Ok(())
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn max_tokens_check(mut self, n: usize) -> Self {
        self.config.max_tokens_check = n.max(1);
        self
    }

    pub fn tokenizer_model(mut self, model: impl Into<String>) -> Self {
        self.config.tokenizer_model = model.into();
        self
    }

    pub fn model_name(mut self, model: impl Into<String>) -> Self {
        self.config.model_name = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn transport_retries(mut self, n: u32) -> Self {
        self.config.transport_retries = n;
        self
    }

    pub fn transport_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.transport_retry_delay_ms = ms;
        self
    }

    pub fn attempt_delay_ms(mut self, ms: u64) -> Self {
        self.config.attempt_delay_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, PipelineError> {
        self.config
            .validate()
            .map_err(PipelineError::InvalidConfig)?;
        Ok(self.config)
    }
}

// ── Rubric metrics ───────────────────────────────────────────────────────

/// One quality dimension of the evaluation rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Score key the evaluator must report, e.g. "correctness".
    pub name: String,
    /// Prompt-facing description of what the dimension measures.
    pub description: String,
    /// Minimum passing score in `[0, 1]`.
    pub threshold: f64,
}

#[derive(Deserialize)]
struct MetricsFile {
    metrics: Vec<Metric>,
}

/// The loaded rubric, shared read-only across all evaluations of a run.
#[derive(Debug, Clone)]
pub struct MetricSet {
    metrics: Vec<Metric>,
}

impl MetricSet {
    /// Build a metric set from explicit metrics, validating thresholds.
    pub fn new(metrics: Vec<Metric>) -> Result<Self, PipelineError> {
        if metrics.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "metric set must not be empty".into(),
            ));
        }
        for m in &metrics {
            if !(0.0..=1.0).contains(&m.threshold) {
                return Err(PipelineError::InvalidConfig(format!(
                    "metric '{}' threshold {} is outside [0, 1]",
                    m.name, m.threshold
                )));
            }
        }
        Ok(Self { metrics })
    }

    /// Load the rubric from a JSON file with a top-level "metrics" list.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| PipelineError::ConfigNotFound {
            path: path.to_path_buf(),
        })?;
        let file: MetricsFile =
            serde_json::from_str(&raw).map_err(|e| PipelineError::MetricsInvalid {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        Self::new(file.metrics).map_err(|e| PipelineError::MetricsInvalid {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Metrics in configured order — threshold checking stops at the first
    /// failing metric in this order.
    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
