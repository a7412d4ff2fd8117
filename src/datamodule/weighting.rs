//! Class weights for imbalanced training sets

use serde::{Deserialize, Serialize};

/// How a class histogram is turned into loss weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeighting {
    /// `1 / ln(1.01 + p_c)` with `p_c` the class frequency
    #[default]
    LogProb,
    /// `N / (K * n_c)`; empty classes get zero weight
    Inverse,
    Uniform,
}

/// Weight per class for the given histogram
pub fn class_weighting(counts: &[usize], mode: ClassWeighting) -> Vec<f32> {
    let total: usize = counts.iter().sum();
    match mode {
        ClassWeighting::LogProb => counts
            .iter()
            .map(|&n| {
                let p = if total > 0 {
                    n as f64 / total as f64
                } else {
                    0.0
                };
                (1.0 / (1.01 + p).ln()) as f32
            })
            .collect(),
        ClassWeighting::Inverse => {
            let k = counts.len() as f64;
            counts
                .iter()
                .map(|&n| {
                    if n == 0 {
                        0.0
                    } else {
                        (total as f64 / (k * n as f64)) as f32
                    }
                })
                .collect()
        }
        ClassWeighting::Uniform => vec![1.0; counts.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_prob_favours_rare_classes() {
        let w = class_weighting(&[900, 90, 10], ClassWeighting::LogProb);
        assert_eq!(w.len(), 3);
        assert!(w[0] < w[1] && w[1] < w[2]);
        let expected = (1.0 / (1.01f64 + 0.9).ln()) as f32;
        assert!((w[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_inverse_balanced_is_one() {
        let w = class_weighting(&[5, 5, 5, 5], ClassWeighting::Inverse);
        assert!(w.iter().all(|x| (x - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_inverse_empty_class() {
        let w = class_weighting(&[4, 0], ClassWeighting::Inverse);
        assert_eq!(w, vec![0.5, 0.0]);
    }

    #[test]
    fn test_uniform_and_empty() {
        assert_eq!(class_weighting(&[3, 7], ClassWeighting::Uniform), vec![1.0, 1.0]);
        assert!(class_weighting(&[], ClassWeighting::LogProb).is_empty());
    }
}
