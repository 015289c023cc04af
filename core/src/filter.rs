//! Sequential importance resampling (SIR) particle filter.
//!
//! One filtering cycle turns a prior belief, an action and (optionally) an observation into a
//! posterior belief:
//!
//! 1. **Propagation** ([`ParticleFilter::propagate_particles`]): particles already advanced by an
//!    earlier call are trusted as-is; the shortfall to the target population size is filled by
//!    drawing from the prior in proportion to weight and advancing each draw through the
//!    [`TransitionModel`]. Draws rejected by the collision/terminal policy are dropped, not
//!    retried, so the propagated population may be smaller than requested.
//! 2. **Update** ([`Filter::filter`]): every propagated particle is reweighted by the
//!    [`ObservationModel`] likelihood, zero-weight hypotheses are dropped, the survivors are
//!    normalized and `num_particles` equally weighted particles are drawn from them.
//!
//! If no particle survives the update, the cycle does not fail. The propagated population is
//! rebuilt around the observation by the configured [`RecoveryConfig`] and returned as is, with
//! [`FilterResult::replenished`] set. In that case the result holds as many particles as were
//! propagated, which may differ from `num_particles`.
//!
//! # Randomness
//!
//! Every random draw, including the ones made while recovering from depletion, comes from the RNG
//! carried by the [`FilterRequest`]. Two calls with identically seeded generators and
//! deterministic models produce identical beliefs.
//!
//! # Example
//!
//! ```rust
//! use pomdp_filter::error::ModelError;
//! use pomdp_filter::filter::{Filter, FilterRequest, ParticleFilter};
//! use pomdp_filter::models::{ObservationModel, PropagationRequest, PropagationResult, TransitionModel};
//! use pomdp_filter::particle::Particle;
//! use pomdp_filter::state::{Action, Observation, RobotState};
//! use nalgebra::DVector;
//! use rand::{RngCore, SeedableRng};
//! use rand::rngs::StdRng;
//!
//! #[derive(Debug)]
//! struct Stay;
//! impl TransitionModel for Stay {
//!     fn propagate(&self, request: &PropagationRequest<'_>, _rng: &mut dyn RngCore)
//!         -> Result<PropagationResult, ModelError> {
//!         Ok(PropagationResult::new(RobotState::new(request.current_state.vector().clone())))
//!     }
//! }
//! #[derive(Debug)]
//! struct Flat;
//! impl ObservationModel for Flat {
//!     fn likelihood(&self, _: &RobotState, _: &Action, _: &Observation) -> Result<f64, ModelError> {
//!         Ok(1.0)
//!     }
//! }
//!
//! let prior: Vec<Particle> = (0..4)
//!     .map(|i| Particle::new(RobotState::from(vec![i as f64]).into_handle(), 0.25))
//!     .collect();
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut request = FilterRequest::new(prior, 4, DVector::zeros(1), &Stay, &Flat, &mut rng)
//!     .with_observation(DVector::zeros(1));
//! let result = ParticleFilter::default().filter(&mut request).unwrap();
//! assert_eq!(result.particles.len(), 4);
//! ```
use crate::config::ParticleFilterConfig;
use crate::error::{FilterError, Result};
use crate::models::{ObservationModel, PropagationRequest, TransitionModel};
use crate::particle::{Particle, ParticleSet};
use crate::recovery::RecoveryConfig;
use crate::sampler::{ResamplingStrategy, WeightedSampler};
use crate::state::{Action, Observation};

use log::{debug, warn};
use rand::RngCore;
use std::fmt::{self, Debug};

/// Everything a filter needs for one belief update.
///
/// The request is read-only apart from the RNG, which every random draw advances.
pub struct FilterRequest<'a> {
    /// Prior belief
    pub previous_particles: Vec<Particle>,
    /// Particles already advanced by an earlier call; kept as-is and placed first
    pub current_next_particles: Vec<Particle>,
    /// Target population size
    pub num_particles: usize,
    /// Action applied between the prior and the posterior
    pub action: Action,
    /// Observation received after the action; `None` skips the reweighting
    pub observation: Option<Observation>,
    /// Sole source of randomness for the call
    pub random_engine: &'a mut dyn RngCore,
    pub transition_model: &'a dyn TransitionModel,
    pub observation_model: &'a dyn ObservationModel,
    /// Pass `allow_collisions` to the transition model and keep colliding successors
    pub allow_collisions: bool,
    /// Keep colliding successors even when collisions are not allowed
    pub allow_terminal_states: bool,
    /// Keep zero-weight particles instead of discarding them
    pub allow_zero_weight_particles: bool,
}
impl Debug for FilterRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRequest")
            .field("previous_particles", &self.previous_particles.len())
            .field("current_next_particles", &self.current_next_particles.len())
            .field("num_particles", &self.num_particles)
            .field("action", &format_args!("{:?}", self.action.as_slice()))
            .field("has_observation", &self.observation.is_some())
            .field("transition_model", &self.transition_model)
            .field("observation_model", &self.observation_model)
            .field("allow_collisions", &self.allow_collisions)
            .field("allow_terminal_states", &self.allow_terminal_states)
            .field(
                "allow_zero_weight_particles",
                &self.allow_zero_weight_particles,
            )
            .finish()
    }
}
impl<'a> FilterRequest<'a> {
    /// Create a request with no observation, no carried-over particles and all policy flags off.
    pub fn new(
        previous_particles: Vec<Particle>,
        num_particles: usize,
        action: Action,
        transition_model: &'a dyn TransitionModel,
        observation_model: &'a dyn ObservationModel,
        random_engine: &'a mut dyn RngCore,
    ) -> Self {
        FilterRequest {
            previous_particles,
            current_next_particles: Vec::new(),
            num_particles,
            action,
            observation: None,
            random_engine,
            transition_model,
            observation_model,
            allow_collisions: false,
            allow_terminal_states: false,
            allow_zero_weight_particles: false,
        }
    }
    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }
    pub fn with_current_next_particles(mut self, particles: Vec<Particle>) -> Self {
        self.current_next_particles = particles;
        self
    }
    pub fn allow_collisions(mut self, allow: bool) -> Self {
        self.allow_collisions = allow;
        self
    }
    pub fn allow_terminal_states(mut self, allow: bool) -> Self {
        self.allow_terminal_states = allow;
        self
    }
    pub fn allow_zero_weight_particles(mut self, allow: bool) -> Self {
        self.allow_zero_weight_particles = allow;
        self
    }
}

/// Output of a filter call. The caller owns the particles.
#[derive(Clone, Debug, Default)]
pub struct FilterResult {
    pub particles: Vec<Particle>,
    /// Set when the population was rebuilt after every particle scored a zero likelihood
    pub replenished: bool,
    /// Effective sample size of the reweighted survivors, before resampling. Only set by a
    /// filter call that reached the resampling step.
    pub effective_sample_size: Option<f64>,
}
impl FilterResult {
    pub fn new(particles: Vec<Particle>) -> Self {
        FilterResult {
            particles,
            replenished: false,
            effective_sample_size: None,
        }
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn total_weight(&self) -> f64 {
        self.particles.iter().map(|p| p.weight()).sum()
    }
}

/// A belief-update strategy. Callers depend on this trait so filters can be swapped freely.
pub trait Filter: Send + Sync {
    fn filter(&self, request: &mut FilterRequest<'_>) -> Result<FilterResult>;
}

#[derive(Clone, Debug, Default)]
pub struct ParticleFilter {
    config: ParticleFilterConfig,
}

impl ParticleFilter {
    pub fn new(config: ParticleFilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(ParticleFilter { config })
    }
    pub fn with_resampling_strategy(strategy: ResamplingStrategy) -> Self {
        ParticleFilter {
            config: ParticleFilterConfig {
                resampling_strategy: strategy,
                ..ParticleFilterConfig::default()
            },
        }
    }
    pub fn config(&self) -> &ParticleFilterConfig {
        &self.config
    }
    pub fn recovery(&self) -> &RecoveryConfig {
        &self.config.recovery
    }
    fn sampler(&self) -> WeightedSampler {
        WeightedSampler::new(self.config.resampling_strategy)
    }

    /// Fill the population up to `num_particles` by advancing draws from the prior.
    ///
    /// Carried-over particles come first, in their original order, followed by the accepted new
    /// particles. When the request already holds `num_particles` or more advanced particles they
    /// are returned unchanged and nothing is propagated.
    ///
    /// A propagated sample is kept iff collisions are allowed, it did not collide, or terminal
    /// states are allowed. It inherits the weight of the particle it was drawn from and is
    /// dropped if that weight is zero and zero weights are not allowed. Rejected samples are not
    /// replaced, so the result can be shorter than `num_particles`.
    ///
    /// # Errors
    /// * [`FilterError::Transition`] if the transition model fails for any sample
    /// * [`FilterError::EmptyParticleSet`] if there is a deficit but no prior to draw from
    pub fn propagate_particles(&self, request: &mut FilterRequest<'_>) -> Result<FilterResult> {
        let carried = request.current_next_particles.len();
        if carried >= request.num_particles {
            return Ok(FilterResult::new(request.current_next_particles.clone()));
        }
        let deficit = request.num_particles - carried;

        let particle_set =
            ParticleSet::from_prior(&request.previous_particles).with_sampler(self.sampler());
        let sampled = particle_set.sample_weighted(&mut *request.random_engine, deficit)?;

        let mut particles = Vec::with_capacity(request.num_particles);
        particles.extend(request.current_next_particles.iter().cloned());
        let mut collided = 0usize;
        let mut zero_weight = 0usize;
        for sampled_particle in &sampled {
            let propagation_request = PropagationRequest {
                current_state: sampled_particle.state(),
                action: &request.action,
                allow_collisions: request.allow_collisions,
            };
            let propagation = request
                .transition_model
                .propagate(&propagation_request, &mut *request.random_engine)
                .map_err(FilterError::Transition)?;

            if !(request.allow_collisions
                || !propagation.collided()
                || request.allow_terminal_states)
            {
                collided += 1;
                continue;
            }
            let weight = sampled_particle.weight();
            if !(weight > 0.0 || request.allow_zero_weight_particles) {
                zero_weight += 1;
                continue;
            }
            let mut next_state = propagation.next_state;
            next_state
                .attachment_mut()
                .set_previous_state(sampled_particle.state());
            particles.push(Particle::new(next_state.into_handle(), weight));
        }

        debug!(
            "Propagated {} of {} samples ({} carried over)",
            particles.len() - carried,
            deficit,
            carried
        );
        if particles.len() < request.num_particles {
            warn!(
                "Propagation produced {} of {} particles: {} rejected by collision policy, {} with zero weight",
                particles.len(),
                request.num_particles,
                collided,
                zero_weight
            );
        }
        Ok(FilterResult::new(particles))
    }

    /// Multiply every weight by the observation likelihood and drop the particles that can no
    /// longer be kept.
    ///
    /// The products are formed in log space and shifted so the heaviest survivor has weight 1. The
    /// survivors keep the proportions `w * p(z | x)` without overflowing, however large the prior
    /// weights or densities are.
    fn reweight(
        &self,
        request: &FilterRequest<'_>,
        propagated: &[Particle],
    ) -> Result<Vec<Particle>> {
        if request.observation.is_none() {
            warn!("No observation; particle weights are not updated this cycle");
        }
        let mut survivors = Vec::with_capacity(propagated.len());
        let mut log_weights = Vec::with_capacity(propagated.len());
        for particle in propagated {
            let pdf = match &request.observation {
                Some(observation) => {
                    let density = request
                        .observation_model
                        .likelihood(particle.state(), &request.action, observation)
                        .map_err(FilterError::Likelihood)?;
                    if !density.is_finite() || density < 0.0 {
                        return Err(FilterError::InvalidLikelihood(density));
                    }
                    density
                }
                None => 1.0,
            };
            let alive = particle.weight() > 0.0 && pdf > 0.0;
            if alive || request.allow_zero_weight_particles {
                let log_weight = if alive {
                    particle.weight().ln() + pdf.ln()
                } else {
                    f64::NEG_INFINITY
                };
                log_weights.push(log_weight);
                survivors.push(particle.clone());
            }
        }

        let max_log_weight = log_weights
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        for (survivor, log_weight) in survivors.iter_mut().zip(log_weights) {
            let weight = if max_log_weight.is_finite() {
                (log_weight - max_log_weight).exp()
            } else {
                0.0
            };
            survivor.set_weight(weight);
        }
        Ok(survivors)
    }
}

impl Filter for ParticleFilter {
    fn filter(&self, request: &mut FilterRequest<'_>) -> Result<FilterResult> {
        let propagated = self.propagate_particles(request)?;
        if propagated.is_empty() {
            warn!("Couldn't generate any valid particles; check the terminal and collision policy");
        }
        let survivors = self.reweight(request, &propagated.particles)?;

        if survivors.is_empty() {
            if propagated.is_empty() {
                return Ok(propagated);
            }
            let replenished = self.config.recovery.replenish(
                &propagated.particles,
                request.observation.as_ref(),
                &mut *request.random_engine,
            )?;
            warn!(
                "All {} propagated particles have zero weight; replenished them around the observation",
                replenished.len()
            );
            warn!("Check the likelihood computed by the observation model");
            return Ok(FilterResult {
                particles: replenished,
                replenished: true,
                effective_sample_size: None,
            });
        }

        // Survivors that all carry zero weight (allowed by the request) become uniform.
        let mut survivor_set = ParticleSet::from_particles(survivors).with_sampler(self.sampler());
        survivor_set.normalize();
        let effective_sample_size = survivor_set.effective_sample_size();

        let mut resampled =
            survivor_set.sample_weighted(&mut *request.random_engine, request.num_particles)?;
        if !resampled.is_empty() {
            let new_weight = 1.0 / resampled.len() as f64;
            for particle in &mut resampled {
                particle.set_weight(new_weight);
            }
        }
        debug!(
            "Resampled {} particles from {} survivors (effective sample size {:.1})",
            resampled.len(),
            survivor_set.len(),
            effective_sample_size
        );
        Ok(FilterResult {
            particles: resampled,
            replenished: false,
            effective_sample_size: Some(effective_sample_size),
        })
    }
}
