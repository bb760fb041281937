//! Overall score and verdict.

use std::collections::BTreeMap;
use pharmaqa_core::{Dimension, DimensionResult, QualityThresholds, Verdict};

/// Overall scores below this always fail.
pub const FAIL_BELOW: f64 = 0.70;

/// Aggregated score of one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionScore {
    /// Dimension
    pub dimension: Dimension,
    /// Mean of the dimension's usable results
    pub score: f64,
    /// Threshold of the dimension
    pub threshold: f64,
    /// Usable results averaged
    pub results: usize,
}

impl DimensionScore {
    /// Whether the dimension reached its threshold.
    pub fn meets_threshold(&self) -> bool {
        self.score >= self.threshold
    }
}

/// Result of scoring a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    /// Mean of the dimension scores
    pub overall_score: f64,
    /// Pass, warn or fail
    pub verdict: Verdict,
    /// Dimensions that contributed, in canonical order
    pub dimensions: Vec<DimensionScore>,
}

/// Averages usable results of each dimension.
///
/// Failed results are skipped, and a dimension with no usable result is
/// absent from the output.
pub fn dimension_scores(results: &[DimensionResult], thresholds: &QualityThresholds) -> Vec<DimensionScore> {
    let mut sums: BTreeMap<Dimension, (f64, usize)> = BTreeMap::new();
    for result in results {
        if let Some(score) = result.usable_score() {
            let entry = sums.entry(result.dimension).or_default();
            entry.0 += score;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(dimension, (sum, n))| DimensionScore {
            dimension,
            score: sum / n as f64,
            threshold: thresholds.threshold_for(dimension),
            results: n,
        })
        .collect()
}

/// Turns dimension results into an overall score and verdict.
#[derive(Debug, Clone)]
pub struct Scorer {
    thresholds: QualityThresholds,
    fail_below: f64,
}

impl Scorer {
    /// Create a scorer for a run's thresholds.
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds, fail_below: FAIL_BELOW }
    }

    /// Score the results. `None` when no dimension produced a usable score.
    ///
    /// The verdict fails under the fixed floor and warns under the strictest
    /// threshold among the dimensions that were actually evaluated.
    pub fn score(&self, results: &[DimensionResult]) -> Option<ScoreOutcome> {
        let dimensions = dimension_scores(results, &self.thresholds);
        if dimensions.is_empty() {
            return None;
        }

        let overall_score = dimensions.iter().map(|d| d.score).sum::<f64>() / dimensions.len() as f64;
        let floor = dimensions
            .iter()
            .map(|d| d.threshold)
            .fold(f64::INFINITY, f64::min);

        let verdict = if overall_score < self.fail_below {
            Verdict::Fail
        } else if overall_score < floor {
            Verdict::Warn
        } else {
            Verdict::Pass
        };

        Some(ScoreOutcome { overall_score, verdict, dimensions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmaqa_core::CheckFailure;

    fn scored(dimension: Dimension, score: f64) -> DimensionResult {
        DimensionResult::scored(dimension, None, score, 0.0, 10)
    }

    fn failed(dimension: Dimension) -> DimensionResult {
        DimensionResult::failed(dimension, None, CheckFailure::Timeout { after_ms: 10 })
    }

    fn scorer() -> Scorer {
        Scorer::new(QualityThresholds::default())
    }

    #[test]
    fn test_failed_dimension_is_excluded_not_zero() {
        let results = vec![
            scored(Dimension::Completeness, 0.9),
            failed(Dimension::Accuracy),
            scored(Dimension::Consistency, 0.6),
            scored(Dimension::Uniqueness, 1.0),
        ];
        let outcome = scorer().score(&results).unwrap();
        assert!((outcome.overall_score - 0.8333).abs() < 1e-3);
        assert_eq!(outcome.dimensions.len(), 3);
        assert!(outcome.dimensions.iter().all(|d| d.dimension != Dimension::Accuracy));
        // 0.833 sits between the floor and the strictest active threshold (0.85).
        assert_eq!(outcome.verdict, Verdict::Warn);
    }

    #[test]
    fn test_below_floor_fails_regardless_of_thresholds() {
        let mut thresholds = QualityThresholds::default();
        thresholds.completeness = 0.1;
        let outcome = Scorer::new(thresholds)
            .score(&[scored(Dimension::Completeness, 0.65)])
            .unwrap();
        assert_eq!(outcome.overall_score, 0.65);
        assert_eq!(outcome.verdict, Verdict::Fail);
    }

    #[test]
    fn test_warn_uses_only_evaluated_thresholds() {
        // Timeliness (ratio 0.70) alone: 0.75 passes even though uniqueness wants 0.98.
        let outcome = scorer().score(&[scored(Dimension::Timeliness, 0.75)]).unwrap();
        assert_eq!(outcome.verdict, Verdict::Pass);

        let outcome = scorer()
            .score(&[scored(Dimension::Timeliness, 0.75), failed(Dimension::Uniqueness)])
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Pass);

        let strict = [scored(Dimension::Completeness, 0.75), scored(Dimension::Uniqueness, 0.85)];
        assert_eq!(scorer().score(&strict).unwrap().verdict, Verdict::Warn);

        // Evaluating timeliness lowers the floor to its 0.70 ratio.
        let mut relaxed = strict.to_vec();
        relaxed.push(scored(Dimension::Timeliness, 0.80));
        let outcome = scorer().score(&relaxed).unwrap();
        assert!((outcome.overall_score - 0.8).abs() < 1e-9);
        assert_eq!(outcome.verdict, Verdict::Pass);
    }

    #[test]
    fn test_collections_average_within_their_dimension() {
        let results = vec![
            scored(Dimension::Completeness, 1.0),
            scored(Dimension::Completeness, 0.5),
            scored(Dimension::Completeness, 0.6),
            scored(Dimension::Uniqueness, 1.0),
        ];
        let outcome = scorer().score(&results).unwrap();
        assert_eq!(outcome.dimensions[0].results, 3);
        assert!((outcome.dimensions[0].score - 0.7).abs() < 1e-9);
        assert!((outcome.overall_score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_nothing_usable_has_no_score() {
        assert!(scorer().score(&[failed(Dimension::Accuracy)]).is_none());
        assert!(scorer().score(&[]).is_none());
    }
}
