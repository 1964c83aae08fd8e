use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Ordered period durations in hours.
///
/// `T` power periods bound `T + 1` energy boundaries (fence-post indexing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Periods(Vec<f64>);

impl Periods {
    pub fn new(durations_h: Vec<f64>) -> Result<Self, ConfigurationError> {
        if durations_h.is_empty() {
            return Err(ConfigurationError::InvalidPeriods(
                "at least one period is required".to_string(),
            ));
        }
        if let Some((index, d)) = durations_h
            .iter()
            .enumerate()
            .find(|(_, d)| !d.is_finite() || **d <= 0.0)
        {
            return Err(ConfigurationError::InvalidPeriods(format!(
                "period {index} has duration {d}h, expected a positive finite value"
            )));
        }
        Ok(Self(durations_h))
    }

    /// `n` periods of equal length.
    pub fn uniform(n: usize, duration_h: f64) -> Result<Self, ConfigurationError> {
        Self::new(vec![duration_h; n])
    }

    /// Number of power periods (`T`).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of energy boundaries (`T + 1`).
    pub fn boundaries(&self) -> usize {
        self.0.len() + 1
    }

    /// Duration of period `t` in hours.
    pub fn duration(&self, t: usize) -> f64 {
        self.0[t]
    }

    pub fn durations(&self) -> &[f64] {
        &self.0
    }

    pub fn horizon_hours(&self) -> f64 {
        self.0.iter().sum()
    }
}

impl TryFrom<Vec<f64>> for Periods {
    type Error = ConfigurationError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Periods> for Vec<f64> {
    fn from(value: Periods) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_post_counts() {
        let periods = Periods::new(vec![0.25, 0.25, 1.0]).unwrap();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods.boundaries(), 4);
        assert_eq!(periods.horizon_hours(), 1.5);
    }

    #[test]
    fn test_rejects_empty_and_non_positive() {
        assert!(Periods::new(vec![]).is_err());
        assert!(Periods::new(vec![1.0, 0.0]).is_err());
        assert!(Periods::new(vec![f64::NAN]).is_err());
    }
}
