//! Small statistics helpers shared by the session and feedback engines.

use serde::{Deserialize, Serialize};

/// Direction of a rate or score over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Recent window is better than the previous one.
    Improving,
    /// Recent window is worse than the previous one.
    Declining,
    /// Difference is within the threshold.
    Stable,
    /// Not enough samples to compare.
    InsufficientData,
}

impl Trend {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Declining => "declining",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }

    /// Classify `recent - previous` against a symmetric threshold.
    pub fn classify(recent: f64, previous: f64, threshold: f64) -> Self {
        let delta = recent - previous;
        if delta > threshold {
            Trend::Improving
        } else if delta < -threshold {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation; 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Fraction of `true` values; `None` for an empty iterator.
pub fn success_rate<I: IntoIterator<Item = bool>>(outcomes: I) -> Option<f64> {
    let (total, successes) = outcomes
        .into_iter()
        .fold((0usize, 0usize), |(t, s), ok| (t + 1, s + usize::from(ok)));
    if total == 0 {
        None
    } else {
        Some(successes as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_classify() {
        assert_eq!(Trend::classify(0.7, 0.5, 0.05), Trend::Improving);
        assert_eq!(Trend::classify(0.5, 0.7, 0.05), Trend::Declining);
        assert_eq!(Trend::classify(0.52, 0.5, 0.05), Trend::Stable);
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(std_dev(&[1.0]), 0.0);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(success_rate(Vec::<bool>::new()), None);
        assert_eq!(success_rate([true, false, true, true]), Some(0.75));
    }

    #[test]
    fn test_trend_serialization() {
        let json = serde_json::to_string(&Trend::InsufficientData).unwrap();
        assert_eq!(json, "\"insufficient_data\"");
    }
}
