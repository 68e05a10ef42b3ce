use serde::{Deserialize, Serialize};

use crate::error::{CapError, Result};
use crate::maps::ExtensionSettings;
use crate::oracle::FlowOracleSettings;
use crate::orbits::GeneratorSettings;
use crate::parallelogram::ParallelogramConstants;

/// Every tunable of a proof run. Missing JSON fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofSettings {
    /// Half-width of the physical h-set boxes.
    pub gain: f64,
    pub order: usize,
    pub power_iterations: usize,
    pub origin_tolerance: f64,
    pub condition_limit: f64,
    pub extension: ExtensionSettings,
    pub oracle: FlowOracleSettings,
    pub parallelogram: ParallelogramConstants,
}

impl Default for ProofSettings {
    fn default() -> Self {
        let generator = GeneratorSettings::default();
        Self {
            gain: 75e-11,
            order: generator.order,
            power_iterations: generator.power_iterations,
            origin_tolerance: generator.origin_tolerance,
            condition_limit: generator.condition_limit,
            extension: generator.extension,
            oracle: FlowOracleSettings::default(),
            parallelogram: ParallelogramConstants::default(),
        }
    }
}

impl ProofSettings {
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text).map_err(|e| CapError::Parse {
            line: e.line(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CapError::InvalidInput(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.gain > 0.0) || !self.gain.is_finite() {
            return Err(CapError::InvalidInput(format!(
                "Gain must be positive, got {}.",
                self.gain
            )));
        }
        if self.order == 0 {
            return Err(CapError::InvalidInput(
                "Integration order must be greater than zero.".to_string(),
            ));
        }
        if self.extension.max_steps == 0 || !(self.extension.tolerance > 0.0) {
            return Err(CapError::InvalidInput(
                "Extension steps and tolerance must be positive.".to_string(),
            ));
        }
        self.generator().validate()?;
        self.oracle.validate()?;
        self.parallelogram.validate()
    }

    pub fn generator(&self) -> GeneratorSettings {
        GeneratorSettings {
            order: self.order,
            power_iterations: self.power_iterations,
            origin_tolerance: self.origin_tolerance,
            condition_limit: self.condition_limit,
            extension: self.extension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = ProofSettings::default();
        settings.validate().expect("defaults");
        assert_eq!(settings.gain, 75e-11);
        assert_eq!(settings.order, 60);
        assert_eq!(settings.power_iterations, 50);
        assert_eq!(settings.generator().order, 60);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings = ProofSettings::from_json(r#"{ "gain": 1e-9, "order": 40 }"#).expect("parse");
        assert_eq!(settings.gain, 1e-9);
        assert_eq!(settings.order, 40);
        assert_eq!(settings.power_iterations, 50);

        let text = settings.to_json().expect("serialize");
        assert_eq!(ProofSettings::from_json(&text).expect("parse"), settings);
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = ProofSettings::from_json(r#"{ "gain": -1.0 }"#).expect_err("negative gain");
        assert!(matches!(err, CapError::InvalidInput(_)));
        assert!(ProofSettings::from_json(r#"{ "power_iterations": 0 }"#).is_err());
        assert!(ProofSettings::from_json(r#"{ "parallelogram": { "alpha": 5.0, "beta": 0.3, "rho": 0.2, "c": 0.01 } }"#).is_err());

        let err = ProofSettings::from_json("{\n  \"gain\": ,\n}").expect_err("malformed");
        assert!(matches!(err, CapError::Parse { line: 2, .. }));
    }
}
