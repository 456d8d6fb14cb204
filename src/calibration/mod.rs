//! Confidence calibration.
//!
//! Every recorded outcome that carries a predicted confidence lands in one of
//! ten equal-width buckets per category. The buckets form a reliability
//! diagram from which a multiplicative correction is derived:
//!
//! ```text
//! factor = Σ actual / Σ predicted      (< 1 overconfident, > 1 underconfident)
//! calibrated = clamp(raw × factor, 0, 1)
//! ```
//!
//! A bucket with at least [`BUCKET_MIN_SAMPLES`] samples uses its own factor,
//! otherwise the category-wide factor applies once the category has
//! [`MIN_SAMPLES`] samples.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feedback::Category;

/// Number of confidence buckets.
pub const BUCKET_COUNT: usize = 10;

/// Samples a category needs before its factor is trusted at all.
pub const MIN_SAMPLES: u64 = 20;

/// Samples a category needs to be considered reliable.
pub const RELIABLE_SAMPLES: u64 = 40;

/// Samples a single bucket needs before its own factor is used.
pub const BUCKET_MIN_SAMPLES: u64 = 5;

/// Factors inside this band raise no warning.
const WARNING_BAND: (f64, f64) = (0.85, 1.15);

/// Factors outside this band are severe.
const SEVERE_BAND: (f64, f64) = (0.75, 1.25);

/// Bucket for a confidence value: `floor(confidence × 10)` clamped to 0..=9.
pub fn bucket_index(confidence: f64) -> usize {
    if !confidence.is_finite() {
        return 0;
    }
    ((confidence * BUCKET_COUNT as f64).floor() as i64).clamp(0, BUCKET_COUNT as i64 - 1) as usize
}

// ============================================================================
// Buckets
// ============================================================================

/// Running sums for one `(category, bucket)` cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    /// Sum of predicted confidences.
    pub predicted_sum: f64,
    /// Number of successes.
    pub actual_sum: f64,
    /// Number of samples.
    pub count: u64,
}

impl CalibrationBucket {
    fn add(&mut self, confidence: f64, success: bool) {
        self.predicted_sum += confidence;
        self.actual_sum += if success { 1.0 } else { 0.0 };
        self.count += 1;
    }

    /// `actual_sum / predicted_sum`, when there is predicted mass.
    pub fn factor(&self) -> Option<f64> {
        if self.predicted_sum > 0.0 {
            Some(self.actual_sum / self.predicted_sum)
        } else {
            None
        }
    }
}

/// How far the calibration of a category can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Fewer than [`MIN_SAMPLES`] samples.
    InsufficientData,
    /// Fewer than [`RELIABLE_SAMPLES`] samples.
    Moderate,
    /// Enough samples.
    Reliable,
}

impl Reliability {
    /// Classify a sample count.
    pub fn from_samples(samples: u64) -> Self {
        if samples < MIN_SAMPLES {
            Reliability::InsufficientData
        } else if samples < RELIABLE_SAMPLES {
            Reliability::Moderate
        } else {
            Reliability::Reliable
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reliability::InsufficientData => "insufficient_data",
            Reliability::Moderate => "moderate",
            Reliability::Reliable => "reliable",
        }
    }
}

impl std::fmt::Display for Reliability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed-band reading of a calibration factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Not enough samples to say anything.
    InsufficientData,
    /// Factor below 0.75.
    SeverelyOverconfident,
    /// Factor in [0.75, 0.90).
    ModeratelyOverconfident,
    /// Factor in [0.90, 1.10].
    WellCalibrated,
    /// Factor in (1.10, 1.25].
    SlightlyUnderconfident,
    /// Factor above 1.25.
    SeverelyUnderconfident,
}

impl Recommendation {
    /// Band for a factor.
    pub fn from_factor(factor: f64) -> Self {
        if factor < 0.75 {
            Recommendation::SeverelyOverconfident
        } else if factor < 0.90 {
            Recommendation::ModeratelyOverconfident
        } else if factor > 1.25 {
            Recommendation::SeverelyUnderconfident
        } else if factor > 1.10 {
            Recommendation::SlightlyUnderconfident
        } else {
            Recommendation::WellCalibrated
        }
    }

    /// Human-readable advice.
    pub fn message(&self) -> &'static str {
        match self {
            Recommendation::InsufficientData => {
                "Not enough samples yet; confidence is used uncorrected"
            }
            Recommendation::SeverelyOverconfident => {
                "Severely overconfident: predictions succeed far less often than claimed"
            }
            Recommendation::ModeratelyOverconfident => {
                "Moderately overconfident: consider lowering confidence estimates"
            }
            Recommendation::WellCalibrated => "Well calibrated",
            Recommendation::SlightlyUnderconfident => {
                "Slightly underconfident: predictions succeed a bit more often than claimed"
            }
            Recommendation::SeverelyUnderconfident => {
                "Severely underconfident: confidence estimates are far too low"
            }
        }
    }
}

/// One row of the reliability diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketReport {
    /// Bucket index (0-9).
    pub index: usize,
    /// Inclusive lower bound of the confidence range.
    pub range_start: f64,
    /// Exclusive upper bound (inclusive for the last bucket).
    pub range_end: f64,
    /// Mean predicted confidence.
    pub avg_predicted: f64,
    /// Observed success rate.
    pub actual_rate: f64,
    /// Number of samples.
    pub count: u64,
}

/// Calibration state of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Category described.
    pub category: Category,
    /// `Σ actual / Σ predicted` over all buckets; 1.0 without data.
    pub calibration_factor: f64,
    /// Non-empty buckets in index order.
    pub buckets: Vec<BucketReport>,
    /// Total samples across buckets.
    pub sample_count: u64,
    /// Trust level derived from the sample count.
    pub reliability: Reliability,
    /// Band of the factor.
    pub recommendation: Recommendation,
}

/// Severity of a calibration warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    /// Factor outside [0.85, 1.15].
    Medium,
    /// Factor outside [0.75, 1.25].
    High,
}

/// A category whose confidence is noticeably off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationWarning {
    /// Affected category.
    pub category: Category,
    /// Its calibration factor.
    pub calibration_factor: f64,
    /// Trust level of the factor.
    pub reliability: Reliability,
    /// How far off it is.
    pub severity: WarningSeverity,
    /// Advice matching the factor band.
    pub message: String,
}

// ============================================================================
// Engine
// ============================================================================

/// Reliability-diagram accumulator and confidence corrector.
#[derive(Debug, Default)]
pub struct CalibrationEngine {
    buckets: DashMap<(Category, usize), CalibrationBucket>,
}

impl CalibrationEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation. Non-finite confidences are ignored.
    pub fn record(&self, category: Category, predicted_confidence: f64, success: bool) {
        if !predicted_confidence.is_finite() {
            debug!(category = %category, "Ignoring non-finite confidence");
            return;
        }
        let confidence = predicted_confidence.clamp(0.0, 1.0);
        let index = bucket_index(confidence);
        self.buckets
            .entry((category, index))
            .or_default()
            .add(confidence, success);
    }

    /// Running sums of one bucket.
    pub fn bucket(&self, category: Category, index: usize) -> CalibrationBucket {
        self.buckets
            .get(&(category, index))
            .map(|b| *b)
            .unwrap_or_default()
    }

    fn category_buckets(&self, category: Category) -> Vec<(usize, CalibrationBucket)> {
        (0..BUCKET_COUNT)
            .filter_map(|index| {
                self.buckets
                    .get(&(category, index))
                    .map(|bucket| (index, *bucket))
            })
            .filter(|(_, bucket)| bucket.count > 0)
            .collect()
    }

    /// Reliability diagram, factor and verdict for a category.
    pub fn get_calibration(&self, category: Category) -> CalibrationReport {
        let cells = self.category_buckets(category);

        let (predicted, actual, samples) = cells.iter().fold(
            (0.0, 0.0, 0u64),
            |(p, a, n), (_, bucket)| (p + bucket.predicted_sum, a + bucket.actual_sum, n + bucket.count),
        );
        let calibration_factor = if predicted > 0.0 { actual / predicted } else { 1.0 };
        let reliability = Reliability::from_samples(samples);
        let recommendation = match reliability {
            Reliability::InsufficientData => Recommendation::InsufficientData,
            Reliability::Moderate | Reliability::Reliable => {
                Recommendation::from_factor(calibration_factor)
            }
        };

        let buckets = cells
            .into_iter()
            .map(|(index, bucket)| BucketReport {
                index,
                range_start: index as f64 / BUCKET_COUNT as f64,
                range_end: (index + 1) as f64 / BUCKET_COUNT as f64,
                avg_predicted: bucket.predicted_sum / bucket.count as f64,
                actual_rate: bucket.actual_sum / bucket.count as f64,
                count: bucket.count,
            })
            .collect();

        CalibrationReport {
            category,
            calibration_factor,
            buckets,
            sample_count: samples,
            reliability,
            recommendation,
        }
    }

    /// Correct a raw confidence using what has been observed so far.
    pub fn calibrate(&self, category: Category, raw_confidence: f64) -> f64 {
        if !raw_confidence.is_finite() {
            return 0.0;
        }
        let raw = raw_confidence.clamp(0.0, 1.0);

        let bucket = self.bucket(category, bucket_index(raw));
        if bucket.count >= BUCKET_MIN_SAMPLES {
            if let Some(factor) = bucket.factor() {
                return (raw * factor).clamp(0.0, 1.0);
            }
        }

        let report = self.get_calibration(category);
        match report.reliability {
            Reliability::InsufficientData => raw,
            Reliability::Moderate | Reliability::Reliable => {
                (raw * report.calibration_factor).clamp(0.0, 1.0)
            }
        }
    }

    /// Categories with enough data whose factor is outside [0.85, 1.15].
    pub fn warnings(&self) -> Vec<CalibrationWarning> {
        Category::ALL
            .iter()
            .map(|category| self.get_calibration(*category))
            .filter(|report| report.reliability != Reliability::InsufficientData)
            .filter(|report| {
                report.calibration_factor < WARNING_BAND.0
                    || report.calibration_factor > WARNING_BAND.1
            })
            .map(|report| {
                let factor = report.calibration_factor;
                let severity = if factor < SEVERE_BAND.0 || factor > SEVERE_BAND.1 {
                    WarningSeverity::High
                } else {
                    WarningSeverity::Medium
                };
                CalibrationWarning {
                    category: report.category,
                    calibration_factor: factor,
                    reliability: report.reliability,
                    severity,
                    message: report.recommendation.message().to_string(),
                }
            })
            .collect()
    }

    /// Drop all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}
