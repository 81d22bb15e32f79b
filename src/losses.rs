//! Tversky-family overlap metrics, matching the objective the segmentation
//! network was trained with.

use ndarray::{ArrayView, Dimension};

pub const ALPHA: f32 = 0.7;
pub const BETA: f32 = 0.3;
pub const GAMMA: f32 = 0.75;
pub const SMOOTH: f32 = 1e-5;

/// Tversky index between two same-shaped masks with entries in `[0, 1]`.
///
/// Flattens both inputs and computes
/// `(TP + smooth) / (TP + alpha * FN + beta * FP + smooth)`.
pub fn tversky<D: Dimension>(y_true: ArrayView<f32, D>, y_pred: ArrayView<f32, D>) -> f32 {
    debug_assert_eq!(y_true.shape(), y_pred.shape());

    let mut true_pos = 0.0f64;
    let mut false_neg = 0.0f64;
    let mut false_pos = 0.0f64;
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        let (t, p) = (f64::from(*t), f64::from(*p));
        true_pos += t * p;
        false_neg += t * (1.0 - p);
        false_pos += (1.0 - t) * p;
    }

    let smooth = f64::from(SMOOTH);
    let index = (true_pos + smooth)
        / (true_pos + f64::from(ALPHA) * false_neg + f64::from(BETA) * false_pos + smooth);
    index as f32
}

/// Focal Tversky: `(1 - tversky)^gamma`.
pub fn focal_tversky<D: Dimension>(y_true: ArrayView<f32, D>, y_pred: ArrayView<f32, D>) -> f32 {
    (1.0 - tversky(y_true, y_pred)).powf(GAMMA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    const TOLERANCE: f32 = 1e-4;

    #[test]
    fn test_perfect_overlap_scores_one() {
        let y = arr2(&[[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);

        let score = tversky(y.view(), y.view());

        assert!((score - 1.0).abs() < TOLERANCE);
        assert!(focal_tversky(y.view(), y.view()) < TOLERANCE);
    }

    #[test]
    fn test_disjoint_masks_score_near_zero() {
        let y_true = arr2(&[[1.0, 1.0], [0.0, 0.0]]);
        let y_pred = arr2(&[[0.0, 0.0], [1.0, 1.0]]);

        let score = tversky(y_true.view(), y_pred.view());

        assert!(score < 0.01);
        assert!((focal_tversky(y_true.view(), y_pred.view()) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_scores_stay_in_range() {
        let cases = [
            (
                arr2(&[[1.0, 0.0], [1.0, 1.0]]),
                arr2(&[[0.9, 0.1], [0.4, 0.8]]),
            ),
            (
                arr2(&[[0.0, 0.0], [0.0, 0.0]]),
                arr2(&[[0.2, 0.7], [0.3, 0.0]]),
            ),
            (Array2::zeros((4, 4)), Array2::zeros((4, 4))),
        ];

        for (y_true, y_pred) in cases {
            let t = tversky(y_true.view(), y_pred.view());
            let ft = focal_tversky(y_true.view(), y_pred.view());
            assert!(t > 0.0 && t <= 1.0, "tversky out of range: {}", t);
            assert!((0.0..=1.0).contains(&ft), "focal tversky out of range: {}", ft);
        }
    }

    #[test]
    fn test_false_negatives_cost_more_than_false_positives() {
        // alpha > beta, so missing tumor pixels is penalized harder than
        // marking extra ones.
        let y_true = arr2(&[[1.0, 1.0, 1.0, 0.0]]);
        let missed = arr2(&[[1.0, 1.0, 0.0, 0.0]]);
        let extra = arr2(&[[1.0, 1.0, 1.0, 1.0]]);

        assert!(tversky(y_true.view(), missed.view()) < tversky(y_true.view(), extra.view()));
    }
}
