//! Configuration types

use crate::{ConfigError, TesselError, TesselResult};
use serde::{Deserialize, Serialize};

/// Whether mutating entry points run the consistency checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Check referential integrity before every mutation
    #[default]
    Enabled,
    /// Skip the checker; state violations are still reported
    Disabled,
}

/// Strategy for loading model object children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChildLoading {
    /// One store call per parent. Slow for deep trees.
    #[default]
    PerParent,
    /// One batched subtree call per model-level object
    Subtree,
}

/// Runtime configuration of the entity cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub validation: ValidationMode,
    /// Increment used when handing out new top/bottom z-orders
    pub z_order_step: i32,
    pub child_loading: ChildLoading,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            validation: ValidationMode::Enabled,
            z_order_step: 10,
            child_loading: ChildLoading::PerParent,
        }
    }
}

impl CacheConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TESSEL_CACHE_VALIDATION`: `on` / `off` (default: on)
    /// - `TESSEL_Z_ORDER_STEP`: z-order increment (default: 10)
    /// - `TESSEL_CHILD_LOADING`: `per-parent` / `subtree` (default: per-parent)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            validation: std::env::var("TESSEL_CACHE_VALIDATION")
                .ok()
                .and_then(|s| match s.to_ascii_lowercase().as_str() {
                    "on" | "true" | "1" => Some(ValidationMode::Enabled),
                    "off" | "false" | "0" => Some(ValidationMode::Disabled),
                    _ => None,
                })
                .unwrap_or(defaults.validation),
            z_order_step: std::env::var("TESSEL_Z_ORDER_STEP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.z_order_step),
            child_loading: std::env::var("TESSEL_CHILD_LOADING")
                .ok()
                .and_then(|s| match s.to_ascii_lowercase().as_str() {
                    "per-parent" => Some(ChildLoading::PerParent),
                    "subtree" => Some(ChildLoading::Subtree),
                    _ => None,
                })
                .unwrap_or(defaults.child_loading),
        }
    }

    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_z_order_step(mut self, step: i32) -> Self {
        self.z_order_step = step;
        self
    }

    pub fn with_child_loading(mut self, child_loading: ChildLoading) -> Self {
        self.child_loading = child_loading;
        self
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation == ValidationMode::Enabled
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TesselResult<()> {
        if self.z_order_step <= 0 {
            return Err(TesselError::Config(ConfigError::InvalidValue {
                field: "z_order_step".to_string(),
                value: self.z_order_step.to_string(),
                reason: "z_order_step must be greater than 0".to_string(),
            }));
        }
        Ok(())
    }
}
