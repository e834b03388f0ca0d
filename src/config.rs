//! Typed configuration for the core.
//!
//! Construction takes a configuration struct enumerating the options
//! below; there is no process-wide mutable registry.

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// `T_quiet` at each node, microseconds.
    pub timeout_quiet_usec: u64,
    /// Flood-control off threshold.
    pub disable_threshold: u32,
    /// Flood-control on threshold (hysteresis).
    pub enable_hysteresis: u32,
    /// Break-request hysteresis for WFG trace size.
    pub trace_break_threshold: u32,
    /// Break-consume hysteresis for WFG trace size.
    pub resume_threshold: u32,
    /// Branching factor for local context-id generation.
    pub contextid_multiplier: u32,
    /// Emit unmatched-P2P diagnostics at finalize.
    pub report_lost_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout_quiet_usec: 10_000_000,
            disable_threshold: 1_000_000,
            enable_hysteresis: 100_000,
            trace_break_threshold: 10_000,
            resume_threshold: 1_000,
            contextid_multiplier: 128,
            report_lost_messages: true,
        }
    }
}

impl Config {
    pub fn quiet_timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_quiet_usec)
    }

    /// Validates cross-field constraints that a flat `Default` cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.enable_hysteresis >= self.disable_threshold {
            return Err(CoreError::Configuration(format!(
                "enable_hysteresis ({}) must be strictly less than disable_threshold ({})",
                self.enable_hysteresis, self.disable_threshold
            )));
        }
        if self.resume_threshold >= self.trace_break_threshold {
            return Err(CoreError::Configuration(format!(
                "resume_threshold ({}) must be strictly less than trace_break_threshold ({})",
                self.resume_threshold, self.trace_break_threshold
            )));
        }
        if self.contextid_multiplier == 0 {
            return Err(CoreError::Configuration(
                "contextid_multiplier must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads defaults, then overlays a TOML file (if present), then
    /// `MUST_*`-prefixed environment variables, validating the result.
    pub fn load(toml_path: Option<&std::path::Path>) -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                cfg = toml::from_str(&text)
                    .map_err(|e| CoreError::Configuration(format!("{path:?}: {e}")))?;
            }
        }

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! override_from_env {
            ($field:ident, $name:literal) => {
                if let Ok(v) = std::env::var(concat!("MUST_", $name)) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }
        override_from_env!(timeout_quiet_usec, "TIMEOUT_QUIET_USEC");
        override_from_env!(disable_threshold, "DISABLE_THRESHOLD");
        override_from_env!(enable_hysteresis, "ENABLE_HYSTERESIS");
        override_from_env!(trace_break_threshold, "TRACE_BREAK_THRESHOLD");
        override_from_env!(resume_threshold, "RESUME_THRESHOLD");
        override_from_env!(contextid_multiplier, "CONTEXTID_MULTIPLIER");
        override_from_env!(report_lost_messages, "REPORT_LOST_MESSAGES");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.timeout_quiet_usec, 10_000_000);
        assert_eq!(cfg.disable_threshold, 1_000_000);
        assert_eq!(cfg.enable_hysteresis, 100_000);
        assert_eq!(cfg.contextid_multiplier, 128);
        assert!(cfg.report_lost_messages);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_hysteresis() {
        let cfg = Config {
            enable_hysteresis: 2_000_000,
            disable_threshold: 1_000_000,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_multiplier() {
        let cfg = Config {
            contextid_multiplier: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
