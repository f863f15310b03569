// src/utils/config.rs
//! Engine configuration
//!
//! Layered configuration: built-in defaults, then an optional
//! `config/engine.toml`, then `MATCHSIM_*` environment variables
//! (e.g. `MATCHSIM_RUNTIME__POOL_SIZE=8`).

use crate::resource::scaling::ScalingPolicy;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Worker pool and dispatch settings
///
/// Every field carries a serde default so a partial `[runtime]` table (or a
/// single environment override) fills the rest from the built-in values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of concurrent worker slots (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Default per-job timeout in milliseconds; `None` means no deadline
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,

    /// Iterations executed per progress report chunk (default: 250)
    #[serde(default = "default_progress_chunk")]
    pub progress_chunk: u32,

    /// Grace window before a cancelled worker is force-aborted, in ms
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_pool_size() -> usize {
    4
}

fn default_progress_chunk() -> u32 {
    250
}

fn default_cancel_grace_ms() -> u64 {
    50
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            default_timeout_ms: None,
            progress_chunk: default_progress_chunk(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Auto-scaling policy for the resource manager
    #[serde(default)]
    pub scaling: ScalingPolicy,
}

impl EngineConfig {
    /// Load configuration from defaults, file, and environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/engine").required(false))
            .add_source(config::Environment::with_prefix("MATCHSIM").separator("__"))
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let mut cfg: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        if cfg.runtime.pool_size == 0 {
            cfg.runtime.pool_size = RuntimeConfig::default().pool_size;
        }
        cfg.scaling.validate().map_err(EngineError::Config)?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_runtime_config() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.pool_size, 4);
        assert!(cfg.default_timeout_ms.is_none());
        assert!(cfg.progress_chunk > 0);
    }

    #[test]
    fn test_default_engine_config_is_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.scaling.validate().is_ok());
        assert!(cfg.runtime.pool_size >= 1);
    }

    #[test]
    fn test_partial_config_fills_remaining_fields_from_defaults() {
        // A config source naming only some fields must still deserialize,
        // as happens with a single MATCHSIM_RUNTIME__POOL_SIZE override
        let cfg: EngineConfig = serde_json::from_value(serde_json::json!({
            "runtime": { "pool_size": 8 },
            "scaling": { "max_resources": 16 }
        }))
        .unwrap();

        assert_eq!(cfg.runtime.pool_size, 8);
        assert_eq!(cfg.runtime.progress_chunk, 250);
        assert_eq!(cfg.runtime.cancel_grace_ms, 50);
        assert!(cfg.runtime.default_timeout_ms.is_none());

        assert_eq!(cfg.scaling.max_resources, 16);
        assert_eq!(cfg.scaling.min_resources, 1);
        assert!(cfg.scaling.validate().is_ok());
    }
}
