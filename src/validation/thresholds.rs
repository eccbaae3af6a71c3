//! Cluster-level decision thresholds.
//!
//! Eight scalars drive the confirm / refute / defer decision. A value is
//! immutable once built; the validator swaps thresholds through `&mut self`,
//! so a swap can never interleave with a running decision pass.
//!
//! Thresholds persist as YAML with exactly these eight keys, and reload
//! bitwise-identical — the optimizer depends on that round trip.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThresholdsError {
    #[error("failed to access thresholds file {0}: {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),

    #[error("malformed thresholds file {0}: {1}")]
    Yaml(std::path::PathBuf, #[source] serde_yaml::Error),
}

/// Decision thresholds for the per-cluster validation decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Probability at or above which a point confirms its cluster
    pub min_confidence_confirmation: f64,
    /// Fraction of confirming points needed to confirm the cluster
    pub min_frac_confirmation: f64,
    /// Multiplier relaxing the confirmation probability under a footprint
    pub min_frac_confirmation_factor_if_bd_uni_overlay: f64,
    /// Fraction of overlaid points at or above which the cluster counts as
    /// covered by the vector database
    pub min_uni_db_overlay_frac: f64,
    /// `1 - probability` at or above which a point refutes its cluster
    pub min_confidence_refutation: f64,
    /// Fraction of refuting points needed to refute the cluster
    pub min_frac_refutation: f64,
    /// Entropy at or above which a point counts as uncertain
    pub min_entropy_uncertainty: f64,
    /// Fraction of uncertain points at or above which the whole cluster is
    /// considered too uncertain for an automated decision
    pub min_frac_entropy_uncertain: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            min_confidence_confirmation: 0.6,
            min_frac_confirmation: 0.7,
            min_frac_confirmation_factor_if_bd_uni_overlay: 0.9,
            min_uni_db_overlay_frac: 0.55,
            min_confidence_refutation: 0.7,
            min_frac_refutation: 0.9,
            min_entropy_uncertainty: 1.1,
            min_frac_entropy_uncertain: 0.6,
        }
    }
}

impl DecisionThresholds {
    /// Upper bound of the entropy threshold search space.
    ///
    /// Predictions over `num_classes` classes have Shannon entropy at most
    /// `log2(num_classes)`; the observed maximum sits around half of that.
    pub fn max_entropy_bound(num_classes: usize) -> f64 {
        (num_classes as f64).log2() / 2.0
    }

    /// Range-check all eight fields against their domains.
    pub fn validate(&self, num_classes: usize) -> Result<(), String> {
        let fractions = [
            ("min_confidence_confirmation", self.min_confidence_confirmation),
            ("min_frac_confirmation", self.min_frac_confirmation),
            (
                "min_frac_confirmation_factor_if_bd_uni_overlay",
                self.min_frac_confirmation_factor_if_bd_uni_overlay,
            ),
            ("min_uni_db_overlay_frac", self.min_uni_db_overlay_frac),
            ("min_confidence_refutation", self.min_confidence_refutation),
            ("min_frac_refutation", self.min_frac_refutation),
            ("min_frac_entropy_uncertain", self.min_frac_entropy_uncertain),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("thresholds.{name} must be within [0, 1], got {value}"));
            }
        }
        let max_entropy = (num_classes as f64).log2();
        if !(0.0..=max_entropy).contains(&self.min_entropy_uncertainty) {
            return Err(format!(
                "thresholds.min_entropy_uncertainty must be within [0, {max_entropy:.3}] \
                 for {num_classes} classes, got {}",
                self.min_entropy_uncertainty
            ));
        }
        Ok(())
    }

    /// Serialize to a YAML file with the eight scalar keys.
    pub fn dump(&self, path: &Path) -> Result<(), ThresholdsError> {
        let text = serde_yaml::to_string(self)
            .map_err(|e| ThresholdsError::Yaml(path.to_path_buf(), e))?;
        std::fs::write(path, text).map_err(|e| ThresholdsError::Io(path.to_path_buf(), e))
    }

    /// Deserialize from a YAML file written by [`Self::dump`].
    pub fn load(path: &Path) -> Result<Self, ThresholdsError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ThresholdsError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&text).map_err(|e| ThresholdsError::Yaml(path.to_path_buf(), e))
    }
}
