//! Point estimates of a particle belief.
use crate::particle::Particle;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragingStrategy {
    #[default]
    WeightedAverage,
    UnweightedAverage,
    HighestWeight,
}

impl AveragingStrategy {
    /// Mean and covariance of the belief.
    ///
    /// Returns `None` for an empty belief or when the particles' states differ in dimension.
    /// Weights are normalized internally; if they sum to zero the weighted average degrades to
    /// the unweighted one. `HighestWeight` reports a zero covariance.
    pub fn estimate(&self, particles: &[Particle]) -> Option<(DVector<f64>, DMatrix<f64>)> {
        let first = particles.first()?;
        let dim = first.state().dim();
        if particles.iter().any(|p| p.state().dim() != dim) {
            return None;
        }
        match self {
            AveragingStrategy::WeightedAverage => {
                // Divide by the largest weight first so the total cannot overflow.
                let max = particles.iter().map(|p| p.weight()).fold(0.0_f64, f64::max);
                let total: f64 = particles.iter().map(|p| p.weight() / max).sum();
                if max > 0.0 && total.is_finite() {
                    let weights: Vec<f64> = particles
                        .iter()
                        .map(|p| p.weight() / max / total)
                        .collect();
                    Some(moments(particles, &weights, dim))
                } else {
                    AveragingStrategy::UnweightedAverage.estimate(particles)
                }
            }
            AveragingStrategy::UnweightedAverage => {
                let weights = vec![1.0 / particles.len() as f64; particles.len()];
                Some(moments(particles, &weights, dim))
            }
            AveragingStrategy::HighestWeight => {
                let best = particles
                    .iter()
                    .max_by(|a, b| a.weight().total_cmp(&b.weight()))?;
                Some((best.state().vector().clone(), DMatrix::zeros(dim, dim)))
            }
        }
    }
}

fn moments(particles: &[Particle], weights: &[f64], dim: usize) -> (DVector<f64>, DMatrix<f64>) {
    let mut mean = DVector::<f64>::zeros(dim);
    for (particle, &w) in particles.iter().zip(weights) {
        mean += particle.state().vector() * w;
    }
    let mut cov = DMatrix::<f64>::zeros(dim, dim);
    for (particle, &w) in particles.iter().zip(weights) {
        let diff = particle.state().vector() - &mean;
        cov += w * &diff * diff.transpose();
    }
    (mean, cov)
}
