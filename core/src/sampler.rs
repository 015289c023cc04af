//! Weighted index sampling.
//!
//! [`WeightedSampler`] draws indices into an array of non-negative weights in proportion to the
//! weights. The default [`ResamplingStrategy::Multinomial`] draws every index independently, which
//! is the contract the particle filter relies on. The low-variance strategies are kept for callers
//! that prefer them; they preserve proportionality in expectation but the draws are correlated and
//! returned in ascending index order.
use crate::error::{FilterError, Result};

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// Independent categorical draws (inverse CDF).
    #[default]
    Multinomial,
    /// One uniform offset, evenly spaced pointers.
    Systematic,
    /// One uniform draw per stratum.
    Stratified,
    /// Deterministic copies of `floor(k * w)` plus systematic draws on the remainder.
    Residual,
}

/// Stateless sampler that draws indices proportionally to a weight vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeightedSampler {
    strategy: ResamplingStrategy,
}

impl WeightedSampler {
    pub fn new(strategy: ResamplingStrategy) -> Self {
        WeightedSampler { strategy }
    }
    pub fn strategy(&self) -> ResamplingStrategy {
        self.strategy
    }

    /// Draw `num_samples` indices into `weights`, with replacement, proportionally to weight.
    ///
    /// The weights need not be normalized but must be finite, non-negative and have a positive sum.
    ///
    /// # Arguments
    /// * `rng` - Source of randomness
    /// * `weights` - One weight per candidate index
    /// * `num_samples` - Number of indices to draw
    ///
    /// # Returns
    /// * `num_samples` indices in `[0, weights.len())`
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        weights: &[f64],
        num_samples: usize,
    ) -> Result<Vec<usize>> {
        if num_samples == 0 {
            return Ok(Vec::new());
        }
        let total = validate_weights(weights)?;
        if !total.is_finite() {
            // Individually finite weights whose sum overflows; the proportions are unchanged by
            // dividing through by the largest one.
            let max = weights.iter().copied().fold(0.0_f64, f64::max);
            let scaled: Vec<f64> = weights.iter().map(|w| w / max).collect();
            return self.sample(rng, &scaled, num_samples);
        }
        let indices = match self.strategy {
            ResamplingStrategy::Multinomial => multinomial(rng, weights, num_samples)?,
            ResamplingStrategy::Systematic => systematic(rng, weights, total, num_samples),
            ResamplingStrategy::Stratified => stratified(rng, weights, total, num_samples),
            ResamplingStrategy::Residual => residual(rng, weights, total, num_samples)?,
        };
        Ok(indices)
    }
}

fn validate_weights(weights: &[f64]) -> Result<f64> {
    if weights.is_empty() {
        return Err(FilterError::EmptyParticleSet);
    }
    let mut total = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(FilterError::InvalidWeights(format!(
                "weight {} at index {} is not a finite non-negative number",
                w, i
            )));
        }
        total += w;
    }
    if total <= 0.0 {
        return Err(FilterError::InvalidWeights(
            "weights sum to zero".to_string(),
        ));
    }
    Ok(total)
}

fn multinomial<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[f64],
    num_samples: usize,
) -> Result<Vec<usize>> {
    let distribution =
        WeightedIndex::new(weights).map_err(|e| FilterError::InvalidWeights(e.to_string()))?;
    Ok((0..num_samples).map(|_| distribution.sample(rng)).collect())
}

fn systematic<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[f64],
    total: f64,
    num_samples: usize,
) -> Vec<usize> {
    let step = total / num_samples as f64;
    let offset = rng.random::<f64>() * step;
    let positions: Vec<f64> = (0..num_samples)
        .map(|j| offset + j as f64 * step)
        .collect();
    walk_cumulative(weights, &positions)
}

fn stratified<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[f64],
    total: f64,
    num_samples: usize,
) -> Vec<usize> {
    let step = total / num_samples as f64;
    let positions: Vec<f64> = (0..num_samples)
        .map(|j| (j as f64 + rng.random::<f64>()) * step)
        .collect();
    walk_cumulative(weights, &positions)
}

fn residual<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[f64],
    total: f64,
    num_samples: usize,
) -> Result<Vec<usize>> {
    let k = num_samples as f64;
    let mut indices = Vec::with_capacity(num_samples);
    let mut residuals = vec![0.0; weights.len()];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w / total * k;
        let copies = expected.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        residuals[i] = expected - copies as f64;
    }
    // Rounding can push the deterministic copies one past the request.
    indices.truncate(num_samples);
    let remaining = num_samples - indices.len();
    if remaining > 0 {
        let residual_total: f64 = residuals.iter().sum();
        if residual_total > 0.0 {
            indices.extend(systematic(rng, &residuals, residual_total, remaining));
        } else {
            indices.extend(multinomial(rng, weights, remaining)?);
        }
    }
    Ok(indices)
}

/// Map ascending positions in `[0, sum(weights))` to the index whose cumulative bin contains them.
fn walk_cumulative(weights: &[f64], positions: &[f64]) -> Vec<usize> {
    // Rounding in the running sum must not land a position on a trailing zero weight.
    let last = weights
        .iter()
        .rposition(|&w| w > 0.0)
        .unwrap_or(weights.len() - 1);
    let mut indices = Vec::with_capacity(positions.len());
    let mut i = 0;
    let mut cumsum = weights[0];
    for &position in positions {
        while position >= cumsum && i < last {
            i += 1;
            cumsum += weights[i];
        }
        indices.push(i);
    }
    indices
}
