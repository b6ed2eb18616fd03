use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WindlassError};

/// The distinguished top-level namespace. Terminate requests from this
/// namespace are honored immediately, bypassing the stop budget.
pub const TOP_NAMESPACE: &str = "orchestrator";

/// Model selection for one oracle role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            temperature: default_temperature(),
        }
    }
}

fn default_temperature() -> f32 {
    0.8
}

/// Per-role model configurations — decision, summarization, and finishing
/// can trade cost against quality independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfigurations {
    #[serde(default)]
    pub decision: ModelConfig,
    #[serde(default)]
    pub summary: ModelConfig,
    #[serde(default)]
    pub finish: ModelConfig,
}

/// Parameters governing when and how message history is compacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningParameters {
    /// Summarization fires once history length exceeds this.
    #[serde(default = "default_max_window_summary")]
    pub max_window_summary: usize,
    /// Upper bound on how many entries a single summary step may fold.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for PruningParameters {
    fn default() -> Self {
        Self {
            max_window_summary: default_max_window_summary(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

fn default_max_window_summary() -> usize {
    30
}

fn default_max_queue_size() -> usize {
    50
}

/// Polling bounds for the task scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Longest the loop sleeps between scheduling decisions.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Shortest sleep between scheduling decisions.
    #[serde(default = "default_poll_floor_ms")]
    pub poll_floor_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            poll_floor_ms: default_poll_floor_ms(),
        }
    }
}

fn default_check_interval_ms() -> u64 {
    10_000
}

fn default_poll_floor_ms() -> u64 {
    100
}

/// Configuration of one workflow runner. Immutable for the runner's
/// lifetime; validated at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Hard ceiling on decision cycles per run.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
    /// Rejected terminate requests required before one is honored
    /// (ignored by the top-level namespace).
    #[serde(default = "default_stop_counter_limit")]
    pub stop_counter_limit: u32,
    /// Issue a pass's tool calls concurrently (results are still
    /// reassembled in request order).
    #[serde(default)]
    pub parallel_tools: bool,
    #[serde(default)]
    pub models: ModelConfigurations,
    #[serde(default)]
    pub pruning: PruningParameters,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            recursion_limit: default_recursion_limit(),
            stop_counter_limit: default_stop_counter_limit(),
            parallel_tools: false,
            models: ModelConfigurations::default(),
            pruning: PruningParameters::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn default_namespace() -> String {
    TOP_NAMESPACE.to_string()
}

fn default_recursion_limit() -> u32 {
    50
}

fn default_stop_counter_limit() -> u32 {
    3
}

impl WorkflowConfig {
    /// Create a config for `namespace` with defaults everywhere else.
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Whether this runner belongs to the top-level namespace.
    pub fn is_top_namespace(&self) -> bool {
        self.namespace == TOP_NAMESPACE
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WindlassError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: WorkflowConfig = toml::from_str(&content)
            .map_err(|e| WindlassError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate construction-time invariants. Violations are fatal and
    /// surfaced before any run starts.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(WindlassError::Config("namespace must not be empty".into()));
        }
        if self.recursion_limit == 0 {
            return Err(WindlassError::Config(
                "recursion_limit must be at least 1".into(),
            ));
        }
        if self.stop_counter_limit == 0 {
            return Err(WindlassError::Config(
                "stop_counter_limit must be at least 1".into(),
            ));
        }
        if self.pruning.max_window_summary < 3 {
            return Err(WindlassError::Config(
                "pruning.max_window_summary must be at least 3".into(),
            ));
        }
        if self.pruning.max_queue_size < self.pruning.max_window_summary {
            return Err(WindlassError::Config(
                "pruning.max_queue_size must be >= pruning.max_window_summary".into(),
            ));
        }
        if self.scheduler.poll_floor_ms == 0
            || self.scheduler.poll_floor_ms > self.scheduler.check_interval_ms
        {
            return Err(WindlassError::Config(
                "scheduler.poll_floor_ms must be in 1..=check_interval_ms".into(),
            ));
        }
        Ok(())
    }
}
