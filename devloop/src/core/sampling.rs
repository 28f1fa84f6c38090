//! Attempt-derived sampling parameters.
//!
//! Attempt 0 is the most deterministic; every retry relaxes exploration and no
//! parameter ever decreases as the attempt counter grows.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::SamplingOptions;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub base_temperature: f64,
    pub temperature_step: f64,
    pub max_temperature: f64,
    pub top_p: f64,
    pub top_p_step: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    pub top_k_step: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            base_temperature: 0.0,
            temperature_step: 0.1,
            max_temperature: 1.0,
            top_p: 0.1,
            top_p_step: 0.1,
            top_k: None,
            top_k_step: 0,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_temperature.is_finite() && self.base_temperature >= 0.0) {
            return Err(anyhow!("sampling.base_temperature must be >= 0"));
        }
        if !(self.temperature_step.is_finite() && self.temperature_step > 0.0) {
            return Err(anyhow!("sampling.temperature_step must be > 0"));
        }
        if !(self.max_temperature.is_finite() && self.max_temperature >= self.base_temperature) {
            return Err(anyhow!(
                "sampling.max_temperature must be >= sampling.base_temperature"
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(anyhow!("sampling.top_p must be in (0, 1]"));
        }
        if !(self.top_p_step.is_finite() && self.top_p_step >= 0.0) {
            return Err(anyhow!("sampling.top_p_step must be >= 0"));
        }
        Ok(())
    }
}

/// Sampling options for the 0-based `attempt`.
pub fn sampling_for(attempt: u32, cfg: &SamplingConfig) -> SamplingOptions {
    let n = f64::from(attempt);
    let temperature = (cfg.base_temperature + cfg.temperature_step * n).min(cfg.max_temperature);
    let top_p = (cfg.top_p + cfg.top_p_step * n).min(1.0);
    let top_k = cfg
        .top_k
        .map(|k| k.saturating_add(cfg.top_k_step.saturating_mul(attempt)));
    SamplingOptions {
        temperature: round_to_millis(temperature),
        top_p: round_to_millis(top_p),
        top_k,
    }
}

// 0.1 * 3 is 0.30000000000000004; keep request payloads and logs readable.
fn round_to_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_values() {
        let opts = sampling_for(0, &SamplingConfig::default());
        assert_eq!(opts.temperature, 0.0);
        assert_eq!(opts.top_p, 0.1);
        assert_eq!(opts.top_k, None);
    }

    #[test]
    fn retries_relax_monotonically() {
        let cfg = SamplingConfig {
            top_k: Some(10),
            top_k_step: 5,
            ..SamplingConfig::default()
        };
        let mut previous = sampling_for(0, &cfg);
        for attempt in 1..30 {
            let next = sampling_for(attempt, &cfg);
            assert!(next.temperature >= previous.temperature, "attempt {attempt}");
            assert!(next.top_p >= previous.top_p, "attempt {attempt}");
            assert!(next.top_k >= previous.top_k, "attempt {attempt}");
            previous = next;
        }
        assert_eq!(previous.temperature, 1.0);
        assert_eq!(previous.top_p, 1.0);
    }

    #[test]
    fn step_values_are_rounded() {
        let opts = sampling_for(3, &SamplingConfig::default());
        assert_eq!(opts.temperature, 0.3);
        assert_eq!(opts.top_p, 0.4);
    }

    #[test]
    fn validate_rejects_zero_temperature_step() {
        let cfg = SamplingConfig {
            temperature_step: 0.0,
            ..SamplingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
