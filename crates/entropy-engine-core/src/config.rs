//! Engine configuration.
//!
//! Invalid configuration returns an error immediately; nothing falls back to
//! a silent default after construction. Loadable from TOML:
//!
//! ```toml
//! cache_root = "/var/cache/entropy-engine"
//! round_digits = 15
//! size_limit = 100000000
//! eviction_policy = "least-recently-used"
//! workers = 0
//! external_tool = "/opt/maple/entropy_external.mpl"
//! external_timeout_secs = 600
//! external_poll_ms = 100
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Rule used to pick eviction victims once a store exceeds its byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest access stamp first.
    #[default]
    #[serde(rename = "least-recently-used")]
    LeastRecentlyUsed,
    /// Evict the entry with the fewest recorded hits first, ties broken by
    /// access stamp.
    #[serde(rename = "least-frequently-used")]
    LeastFrequentlyUsed,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root directory for per-function cache namespaces.
    pub cache_root: PathBuf,
    /// Decimal digits numeric arguments are rounded to before keying.
    /// `None` disables rounding.
    pub round_digits: Option<u32>,
    /// Approximate per-function cache size limit in bytes.
    pub size_limit: u64,
    /// Eviction rule applied once `size_limit` is exceeded.
    pub eviction_policy: EvictionPolicy,
    /// Worker pool size. `0` means the number of available processing units.
    pub workers: usize,
    /// Path to the external numeric tool, if any.
    pub external_tool: Option<PathBuf>,
    /// Wall-clock budget for one external tool invocation, in seconds.
    pub external_timeout_secs: u64,
    /// Short poll before an asynchronous invocation returns a pending
    /// handle, in milliseconds.
    pub external_poll_ms: u64,
    /// Decimal digits added per precision-escalation retry.
    pub precision_step: u32,
    /// Hard precision cap; a failure at or above it exhausts the method.
    pub precision_cap: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            round_digits: Some(15),
            size_limit: 100_000_000,
            eviction_policy: EvictionPolicy::default(),
            workers: 0,
            external_tool: None,
            external_timeout_secs: 600,
            external_poll_ms: 100,
            precision_step: 15,
            precision_cap: 75,
        }
    }
}

/// Platform cache directory, with a temp-dir fallback for odd environments.
fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("entropy-engine")
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("parse failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, failing fast on nonsense values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.size_limit == 0 {
            return Err(EngineError::Config("size_limit cannot be 0".into()));
        }
        if self.precision_step == 0 {
            return Err(EngineError::Config("precision_step cannot be 0".into()));
        }
        if self.precision_cap < self.precision_step {
            return Err(EngineError::Config(format!(
                "precision_cap {} below precision_step {}",
                self.precision_cap, self.precision_step
            )));
        }
        if self.external_timeout_secs == 0 {
            return Err(EngineError::Config(
                "external_timeout_secs cannot be 0".into(),
            ));
        }
        if let Some(tool) = &self.external_tool {
            if !tool.is_file() {
                return Err(EngineError::Config(format!(
                    "external tool '{}' is not an executable file",
                    tool.display()
                )));
            }
        }
        Ok(())
    }
}
