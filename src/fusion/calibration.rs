//! Probability ↔ point-margin calibration.
//!
//! The curve is `p = sigmoid(slope * margin)`, symmetric around a pick'em
//! (0 points ↔ 50%). The inverse gives the margin implied by a win
//! probability; the same curve turns a spread edge into a cover probability.

const EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinProbCurve {
    /// Log-odds per point of margin
    pub slope: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FitMetrics {
    pub logloss_before: f64,
    pub logloss_after: f64,
    pub brier_before: f64,
    pub brier_after: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FitResult {
    pub curve: WinProbCurve,
    pub metrics: FitMetrics,
}

pub fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Binary cross-entropy of one forecast `p` against outcome `y` (0 or 1).
pub fn logloss(p: f64, y: f64) -> f64 {
    let p = clamp_prob(p);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

impl WinProbCurve {
    pub fn new(slope: f64) -> Self {
        WinProbCurve { slope }
    }

    /// Home win probability for a home-perspective margin.
    pub fn margin_to_prob(&self, margin: f64) -> f64 {
        sigmoid(self.slope * margin)
    }

    /// Home-perspective margin implied by a home win probability.
    pub fn prob_to_margin(&self, prob: f64) -> f64 {
        logit(prob) / self.slope
    }

    /// Probability that a bet backed by a points edge of `edge` wins.
    pub fn cover_probability(&self, edge: f64) -> f64 {
        sigmoid(self.slope * edge.abs())
    }
}

/// Fit the slope to historical `(predicted_margin, home_won)` samples by
/// gradient descent on log-loss, starting from `start`.
///
/// Returns `None` for degenerate samples (too few, or one-sided outcomes).
pub fn fit_slope(
    samples: &[(f64, f64)],
    start: WinProbCurve,
    max_iters: usize,
    learning_rate: f64,
) -> Option<FitResult> {
    if samples.len() < 8 {
        return None;
    }
    let positives = samples.iter().filter(|(_, y)| *y > 0.5).count();
    if positives == 0 || positives == samples.len() {
        return None;
    }

    let n = samples.len() as f64;
    // Margins are in points; scale the step so it is comparable to the
    // log-odds units the slope multiplies.
    let scale = samples.iter().map(|(m, _)| m * m).sum::<f64>() / n;
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let mut k = start.slope;

    for i in 0..max_iters.max(1) {
        let lr = learning_rate / (1.0 + 0.01 * i as f64) / scale;
        let grad: f64 = samples
            .iter()
            .map(|(m, y)| (sigmoid(k * m) - y) * m)
            .sum::<f64>()
            / n;
        k -= lr * grad;
        if !k.is_finite() {
            return None;
        }
    }
    if k <= 0.0 {
        return None;
    }

    let fitted = WinProbCurve::new(k);
    let mut ll_before = 0.0;
    let mut ll_after = 0.0;
    let mut br_before = 0.0;
    let mut br_after = 0.0;
    for (m, y) in samples {
        let before = start.margin_to_prob(*m);
        let after = fitted.margin_to_prob(*m);
        ll_before += logloss(before, *y);
        ll_after += logloss(after, *y);
        br_before += (before - y).powi(2);
        br_after += (after - y).powi(2);
    }
    Some(FitResult {
        curve: fitted,
        metrics: FitMetrics {
            logloss_before: ll_before / n,
            logloss_after: ll_after / n,
            brier_before: br_before / n,
            brier_after: br_after / n,
        },
    })
}
