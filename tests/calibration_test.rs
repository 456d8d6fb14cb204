//! Calibration tests driven through the outcome store

use std::sync::Arc;

use pretty_assertions::assert_eq;

use reasoning_feedback_core::calibration::{bucket_index, Recommendation, Reliability, WarningSeverity};
use reasoning_feedback_core::clock::ManualClock;
use reasoning_feedback_core::config::FeedbackConfig;
use reasoning_feedback_core::feedback::{Category, FeedbackContext, Outcome, OutcomeStore};

fn outcome_store() -> OutcomeStore {
    OutcomeStore::new(FeedbackConfig::default(), Arc::new(ManualClock::new()), None)
}

fn record(store: &OutcomeStore, category: Category, confidence: f64, success: bool) {
    store.record_outcome(
        category,
        FeedbackContext::new().with_confidence(confidence),
        Outcome::from_success(success),
    );
}

#[test]
fn test_bucket_boundaries() {
    assert_eq!(bucket_index(0.95), 9);
    assert_eq!(bucket_index(0.05), 0);
    assert_eq!(bucket_index(1.0), 9);
    assert_eq!(bucket_index(0.0), 0);
}

#[test]
fn test_twenty_classification_samples_at_point_nine() {
    let store = outcome_store();
    for i in 0..20 {
        record(&store, Category::Classification, 0.9, i < 18);
    }

    let bucket = store.calibration().bucket(Category::Classification, 9);
    assert_eq!(bucket.count, 20);
    assert!((bucket.predicted_sum - 18.0).abs() < 1e-9);
    assert_eq!(bucket.actual_sum, 18.0);

    let report = store.calibration().get_calibration(Category::Classification);
    assert!((report.calibration_factor - 1.0).abs() < 1e-9);
    assert_eq!(report.sample_count, 20);
    assert_eq!(report.reliability, Reliability::Moderate);
    assert_eq!(report.recommendation, Recommendation::WellCalibrated);
}

#[test]
fn test_perfectly_calibrated_category_is_identity() {
    let store = outcome_store();
    // Predicted 0.5, half succeed
    for i in 0..40 {
        record(&store, Category::Retrieval, 0.5, i % 2 == 0);
    }

    let calibration = store.calibration();
    assert_eq!(calibration.get_calibration(Category::Retrieval).calibration_factor, 1.0);
    for x in [0.0, 0.1, 0.37, 0.5, 0.82, 1.0] {
        assert_eq!(calibration.calibrate(Category::Retrieval, x), x);
    }
}

#[test]
fn test_insufficient_data_passes_raw_through() {
    let store = outcome_store();
    for _ in 0..10 {
        record(&store, Category::Prediction, 0.9, false);
    }
    let report = store.calibration().get_calibration(Category::Prediction);
    assert_eq!(report.reliability, Reliability::InsufficientData);
    assert_eq!(report.recommendation, Recommendation::InsufficientData);

    // Bucket 9 has enough samples for its own factor (0 successes) → 0
    assert_eq!(store.calibration().calibrate(Category::Prediction, 0.95), 0.0);
    // Bucket 3 is empty and the category is below the sample floor
    assert_eq!(store.calibration().calibrate(Category::Prediction, 0.3), 0.3);
}

#[test]
fn test_overconfident_tool_execution_warns() {
    let store = outcome_store();
    for i in 0..50 {
        record(&store, Category::ToolExecution, 0.9, i % 2 == 0);
    }

    let warnings = store.calibration().warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].category, Category::ToolExecution);
    assert_eq!(warnings[0].severity, WarningSeverity::High);
    assert_eq!(warnings[0].reliability, Reliability::Reliable);

    let corrected = store.calibration().calibrate(Category::ToolExecution, 0.9);
    assert!((corrected - 0.5).abs() < 1e-9);
}

#[test]
fn test_context_extra_confidence_is_used() {
    let store = outcome_store();
    store.record_outcome(
        Category::Classification,
        FeedbackContext::new().with_extra("predictedConfidence", serde_json::json!(0.42)),
        Outcome::success(),
    );
    assert_eq!(store.calibration().bucket(Category::Classification, 4).count, 1);
}
