//! Decision quality metrics.
//!
//! Targets are {unsure, not_building, building}; predictions are
//! {unsure, refuted, confirmed}. Everything derives from the 3×3 confusion
//! matrix; precision and recall assume a perfect posterior decision for
//! clusters predicted unsure, and ignore clusters whose ground truth is
//! itself ambiguous.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::FinalCodes;

/// Row/column order of the confusion matrix.
const UNSURE: usize = 0;
const NOT_BUILDING: usize = 1;
const BUILDING: usize = 2;

/// Aggregated decision metrics over one corpus of clusters.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionMetrics {
    pub groups_count: usize,
    /// Raw counts, rows = target, columns = prediction,
    /// both ordered (unsure, not_building/refuted, building/confirmed)
    pub confusion: [[u64; 3]; 3],
    /// Share of clusters decided refuted or confirmed (PAD)
    pub automation: f64,
    pub proportion_unsure: f64,
    pub proportion_refuted: f64,
    pub proportion_confirmed: f64,
    /// Share of refutations whose target really was not a building
    pub refutation_accuracy: f64,
    /// Share of confirmations whose target really was a building
    pub confirmation_accuracy: f64,
    /// (Yu + Yc) / (Yu + Yc + Nc); NaN when the denominator is empty
    pub precision: f64,
    /// (Yu + Yc) / (Yu + Yr + Yc); NaN when there are no positives
    pub recall: f64,
}

fn index_of(code: u8, finals: &FinalCodes) -> usize {
    if code == finals.not_building {
        NOT_BUILDING
    } else if code == finals.building {
        BUILDING
    } else {
        // `unsure` and anything unexpected count as undecided
        UNSURE
    }
}

/// Compute metrics for parallel target / decision arrays of final codes.
pub fn evaluate_decisions(targets: &[u8], decisions: &[u8], finals: &FinalCodes) -> DecisionMetrics {
    debug_assert_eq!(targets.len(), decisions.len());
    let mut confusion = [[0u64; 3]; 3];
    for (&target, &decision) in targets.iter().zip(decisions) {
        confusion[index_of(target, finals)][index_of(decision, finals)] += 1;
    }
    let total = targets.len() as f64;

    let column = |c: usize| confusion.iter().map(|row| row[c]).sum::<u64>() as f64;
    let proportion_unsure = column(UNSURE) / total;
    let proportion_refuted = column(NOT_BUILDING) / total;
    let proportion_confirmed = column(BUILDING) / total;

    let refutation_accuracy = confusion[NOT_BUILDING][NOT_BUILDING] as f64 / column(NOT_BUILDING);
    let confirmation_accuracy = confusion[BUILDING][BUILDING] as f64 / column(BUILDING);

    // Quality over unambiguous targets only
    let yu = confusion[BUILDING][UNSURE] as f64;
    let yr = confusion[BUILDING][NOT_BUILDING] as f64;
    let yc = confusion[BUILDING][BUILDING] as f64;
    let nc = confusion[NOT_BUILDING][BUILDING] as f64;
    let precision = (yu + yc) / (yu + yc + nc);
    let recall = (yu + yc) / (yu + yr + yc);

    DecisionMetrics {
        groups_count: targets.len(),
        confusion,
        automation: proportion_refuted + proportion_confirmed,
        proportion_unsure,
        proportion_refuted,
        proportion_confirmed,
        refutation_accuracy,
        confirmation_accuracy,
        precision,
        recall,
    }
}

impl DecisionMetrics {
    /// Scalar metrics as an ordered name → value map (confusion matrix
    /// excluded), the shape the evaluation phase reports.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("groups_count".to_string(), self.groups_count as f64);
        map.insert("automation".to_string(), self.automation);
        map.insert("proportion_unsure".to_string(), self.proportion_unsure);
        map.insert("proportion_refuted".to_string(), self.proportion_refuted);
        map.insert(
            "proportion_confirmed".to_string(),
            self.proportion_confirmed,
        );
        map.insert(
            "refutation_accuracy".to_string(),
            self.refutation_accuracy,
        );
        map.insert(
            "confirmation_accuracy".to_string(),
            self.confirmation_accuracy,
        );
        map.insert("precision".to_string(), self.precision);
        map.insert("recall".to_string(), self.recall);
        map
    }
}

impl std::fmt::Display for DecisionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, value) in self.to_map() {
            writeln!(f, "{name}={value:.3}")?;
        }
        writeln!(f, "confusion matrix (rows: target U/N/Y, cols: decision u/r/c)")?;
        for row in &self.confusion {
            writeln!(f, "  {row:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finals() -> FinalCodes {
        FinalCodes {
            building: 6,
            not_building: 208,
            unsure: 214,
        }
    }

    #[test]
    fn perfect_decisions_score_one() {
        let f = finals();
        let targets = [f.building, f.building, f.not_building, f.not_building];
        let decisions = targets;
        let m = evaluate_decisions(&targets, &decisions, &f);
        assert_eq!(m.automation, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.confusion[2][2], 2);
        assert_eq!(m.confusion[1][1], 2);
    }

    #[test]
    fn unsure_predictions_lower_automation_not_quality() {
        let f = finals();
        let targets = [f.building, f.building, f.not_building, f.not_building];
        let decisions = [f.building, f.unsure, f.not_building, f.unsure];
        let m = evaluate_decisions(&targets, &decisions, &f);
        assert_eq!(m.automation, 0.5);
        // Yu counts as a correct posterior decision
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
    }

    #[test]
    fn false_confirmation_costs_precision() {
        let f = finals();
        let targets = [f.building, f.not_building];
        let decisions = [f.building, f.building];
        let m = evaluate_decisions(&targets, &decisions, &f);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 1.0);
    }

    #[test]
    fn missed_building_costs_recall() {
        let f = finals();
        let targets = [f.building, f.building];
        let decisions = [f.building, f.not_building];
        let m = evaluate_decisions(&targets, &decisions, &f);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 0.5);
    }

    #[test]
    fn empty_positive_denominators_yield_nan() {
        let f = finals();
        let targets = [f.not_building, f.not_building];
        let decisions = [f.not_building, f.unsure];
        let m = evaluate_decisions(&targets, &decisions, &f);
        assert!(m.precision.is_nan());
        assert!(m.recall.is_nan());
    }

    #[test]
    fn ambiguous_targets_are_excluded_from_quality() {
        let f = finals();
        // An unsure target confirmed: counts for automation, not precision
        let targets = [f.unsure, f.building];
        let decisions = [f.building, f.building];
        let m = evaluate_decisions(&targets, &decisions, &f);
        assert_eq!(m.automation, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
    }
}
