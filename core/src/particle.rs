//! Particles and particle sets.
//!
//! A [`Particle`] pairs a shared state handle with an importance weight. Resampling with
//! replacement copies the handle, never the state, so several particles may point at the same
//! [`RobotState`](crate::state::RobotState). Weights are private to each particle.
use crate::error::{FilterError, Result};
use crate::sampler::WeightedSampler;
use crate::state::StateHandle;

use rand::Rng;
use std::fmt::{self, Debug, Display};

#[derive(Clone, Debug)]
pub struct Particle {
    state: StateHandle,
    weight: f64,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("state", &format_args!("{}", self.state))
            .field("weight", &self.weight)
            .finish()
    }
}
impl Particle {
    pub fn new(state: StateHandle, weight: f64) -> Particle {
        debug_assert!(weight >= 0.0, "Particle weight must be non-negative");
        Particle { state, weight }
    }
    /// A particle with weight 1.
    pub fn with_unit_weight(state: StateHandle) -> Particle {
        Particle::new(state, 1.0)
    }
    pub fn weight(&self) -> f64 {
        self.weight
    }
    pub fn set_weight(&mut self, weight: f64) {
        debug_assert!(weight >= 0.0, "Particle weight must be non-negative");
        self.weight = weight;
    }
    pub fn state(&self) -> &StateHandle {
        &self.state
    }
}

/// An ordered collection of particles with uniform and weighted sampling.
#[derive(Clone, Debug, Default)]
pub struct ParticleSet {
    particles: Vec<Particle>,
    sampler: WeightedSampler,
}
impl ParticleSet {
    pub fn new() -> Self {
        Self::default()
    }
    /// Wrap an existing list as-is.
    pub fn from_particles(particles: Vec<Particle>) -> Self {
        ParticleSet {
            particles,
            sampler: WeightedSampler::default(),
        }
    }
    /// Build a set from a prior belief.
    ///
    /// If the prior weights sum to exactly zero, every weight is rewritten to `1/N` so that
    /// weighted sampling remains defined (e.g. at the very first belief update).
    pub fn from_prior(prior: &[Particle]) -> Self {
        let mut particles = prior.to_vec();
        let sum_weights: f64 = particles.iter().map(|p| p.weight).sum();
        if sum_weights == 0.0 && !particles.is_empty() {
            let uniform = 1.0 / particles.len() as f64;
            for particle in &mut particles {
                particle.weight = uniform;
            }
        }
        ParticleSet::from_particles(particles)
    }
    pub fn with_sampler(mut self, sampler: WeightedSampler) -> Self {
        self.sampler = sampler;
        self
    }
    pub fn set_particles(&mut self, particles: Vec<Particle>) {
        self.particles = particles;
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn into_particles(self) -> Vec<Particle> {
        self.particles
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn total_weight(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).sum()
    }
    /// Divide every weight by the total. Falls back to uniform weights when the weights sum to
    /// zero.
    pub fn normalize(&mut self) {
        match self.weight_scale() {
            Some((scale, sum)) => {
                for particle in &mut self.particles {
                    particle.weight = particle.weight / scale / sum;
                }
            }
            None if !self.particles.is_empty() => {
                let uniform = 1.0 / self.particles.len() as f64;
                for particle in &mut self.particles {
                    particle.weight = uniform;
                }
            }
            None => {}
        }
    }
    /// Effective sample size `1 / Σ w_i²` computed on normalized weights.
    pub fn effective_sample_size(&self) -> f64 {
        let Some((scale, sum)) = self.weight_scale() else {
            return 0.0;
        };
        let sum_of_squares: f64 = self
            .particles
            .iter()
            .map(|p| {
                let w = p.weight / scale / sum;
                w * w
            })
            .sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }
    /// A divisor and the sum of the weights after dividing by it, such that the sum is finite.
    ///
    /// The divisor is 1 unless the raw sum overflows, in which case it is the largest weight.
    /// Returns `None` when the weights sum to zero.
    fn weight_scale(&self) -> Option<(f64, f64)> {
        let sum = self.total_weight();
        if sum.is_finite() {
            return (sum > 0.0).then_some((1.0, sum));
        }
        let max = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(0.0_f64, f64::max);
        let scaled: f64 = self.particles.iter().map(|p| p.weight / max).sum();
        (scaled > 0.0 && scaled.is_finite()).then_some((max, scaled))
    }

    /// Draw `num_samples` particles uniformly at random with replacement, ignoring weights.
    pub fn sample_uniform<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        num_samples: usize,
    ) -> Result<Vec<Particle>> {
        if num_samples == 0 {
            return Ok(Vec::new());
        }
        if self.particles.is_empty() {
            return Err(FilterError::EmptyParticleSet);
        }
        let n = self.particles.len();
        Ok((0..num_samples)
            .map(|_| self.particles[rng.random_range(0..n)].clone())
            .collect())
    }

    /// Draw `num_samples` particles with replacement, proportionally to their weights.
    ///
    /// The weights must have a positive sum; [`ParticleSet::from_prior`] guarantees this for a
    /// prior belief.
    pub fn sample_weighted<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        num_samples: usize,
    ) -> Result<Vec<Particle>> {
        if num_samples > 0 && self.particles.is_empty() {
            return Err(FilterError::EmptyParticleSet);
        }
        let weights: Vec<f64> = self.particles.iter().map(|p| p.weight).collect();
        let indices = self.sampler.sample(rng, &weights, num_samples)?;
        Ok(indices
            .into_iter()
            .map(|i| self.particles[i].clone())
            .collect())
    }
}
