//! Replenishment of a depleted population.
//!
//! When every propagated particle scores a zero likelihood the belief carries no information. The
//! filter then rebuilds each hypothesis from its propagated state: contextual dimensions are kept,
//! selected dimensions are shifted by the matching observation component plus bounded uniform
//! noise, and everything else is copied. The result is a fresh, equally weighted population.
//!
//! All noise is drawn from the caller's RNG so a seeded call stays reproducible.
use crate::error::{FilterError, Result};
use crate::particle::Particle;
use crate::state::{Observation, RobotState};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A state dimension nudged toward an observation component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgedDimension {
    pub state_index: usize,
    pub observation_index: usize,
}
impl NudgedDimension {
    pub fn new(state_index: usize, observation_index: usize) -> Self {
        NudgedDimension {
            state_index,
            observation_index,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Dimensions copied unchanged (e.g. the other agent's configuration).
    pub context_dims: Vec<usize>,
    /// Upper bound of the uniform noise `u ~ U[0, bound)`.
    pub noise_upper_bound: f64,
    /// Dimensions rebuilt as `state[s] + observation[o] + u`.
    pub nudged_dims: Vec<NudgedDimension>,
}
impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            context_dims: vec![0, 1],
            noise_upper_bound: 0.5,
            nudged_dims: vec![NudgedDimension::new(2, 0), NudgedDimension::new(3, 1)],
        }
    }
}
impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.noise_upper_bound.is_finite() || self.noise_upper_bound < 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "recovery noise bound must be finite and non-negative, got {}",
                self.noise_upper_bound
            )));
        }
        for nudged in &self.nudged_dims {
            if self.context_dims.contains(&nudged.state_index) {
                return Err(FilterError::InvalidConfig(format!(
                    "state dimension {} is both contextual and nudged",
                    nudged.state_index
                )));
            }
        }
        Ok(())
    }

    /// Rebuild every particle of a depleted population.
    ///
    /// Each new state keeps the attachment of the state it replaces. Returned particles share the
    /// weight `1 / particles.len()`.
    pub fn replenish<R: Rng + ?Sized>(
        &self,
        particles: &[Particle],
        observation: Option<&Observation>,
        rng: &mut R,
    ) -> Result<Vec<Particle>> {
        if particles.is_empty() {
            return Ok(Vec::new());
        }
        let weight = 1.0 / particles.len() as f64;
        let mut replenished = Vec::with_capacity(particles.len());
        for particle in particles {
            let source = particle.state();
            let mut approx = source.vector().clone();
            for &index in &self.context_dims {
                check_index("state", index, approx.len())?;
            }
            for nudged in &self.nudged_dims {
                check_index("state", nudged.state_index, approx.len())?;
                let offset = match observation {
                    Some(obs) => {
                        check_index("observation", nudged.observation_index, obs.len())?;
                        obs[nudged.observation_index]
                    }
                    None => 0.0,
                };
                let noise = self.noise_upper_bound * rng.random::<f64>();
                approx[nudged.state_index] += offset + noise;
            }
            let mut state = RobotState::new(approx);
            state.set_attachment(source.attachment().cloned());
            replenished.push(Particle::new(state.into_handle(), weight));
        }
        Ok(replenished)
    }
}

fn check_index(what: &'static str, index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(FilterError::DimensionMismatch { what, index, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::DVector;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn particle(values: Vec<f64>) -> Particle {
        Particle::new(RobotState::from(values).into_handle(), 0.0)
    }

    #[test]
    fn test_replenish_keeps_context_and_nudges_toward_observation() {
        let mut rng = StdRng::seed_from_u64(42);
        let config = RecoveryConfig::default();
        let observation = DVector::from_vec(vec![1.0, -2.0]);
        let particles = vec![
            particle(vec![5.0, 6.0, 10.0, 20.0]),
            particle(vec![7.0, 8.0, 0.0, 0.0]),
        ];
        let replenished = config
            .replenish(&particles, Some(&observation), &mut rng)
            .unwrap();
        assert_eq!(replenished.len(), 2);
        for (old, new) in particles.iter().zip(&replenished) {
            let before = old.state().vector();
            let after = new.state().vector();
            assert_eq!(after[0], before[0]);
            assert_eq!(after[1], before[1]);
            let dx = after[2] - (before[2] + 1.0);
            let dy = after[3] - (before[3] - 2.0);
            assert!((0.0..0.5).contains(&dx), "dx = {}", dx);
            assert!((0.0..0.5).contains(&dy), "dy = {}", dy);
            assert_approx_eq!(new.weight(), 0.5, 1e-12);
        }
    }

    #[test]
    fn test_replenish_preserves_attachment() {
        let mut rng = StdRng::seed_from_u64(1);
        let parent = RobotState::from(vec![0.0; 4]).into_handle();
        let mut state = RobotState::from(vec![0.0, 0.0, 1.0, 1.0]);
        state.attachment_mut().set_previous_state(&parent);
        state.attachment_mut().insert("visit", 4u32);
        let particles = vec![Particle::new(state.into_handle(), 0.0)];
        let replenished = RecoveryConfig::default()
            .replenish(&particles, None, &mut rng)
            .unwrap();
        let new_state = replenished[0].state();
        assert!(std::sync::Arc::ptr_eq(
            &new_state.previous_state().unwrap(),
            &parent
        ));
        assert_eq!(new_state.attachment().unwrap().get::<u32>("visit"), Some(&4));
    }

    #[test]
    fn test_zero_noise_without_observation_copies_state() {
        let mut rng = StdRng::seed_from_u64(1);
        let config = RecoveryConfig {
            noise_upper_bound: 0.0,
            ..RecoveryConfig::default()
        };
        let particles = vec![particle(vec![1.0, 2.0, 3.0, 4.0])];
        let replenished = config.replenish(&particles, None, &mut rng).unwrap();
        assert_eq!(
            replenished[0].state().vector(),
            particles[0].state().vector()
        );
        assert!(!std::sync::Arc::ptr_eq(
            replenished[0].state(),
            particles[0].state()
        ));
    }

    #[test]
    fn test_out_of_range_dimension() {
        let mut rng = StdRng::seed_from_u64(1);
        let particles = vec![particle(vec![1.0, 2.0])];
        let err = RecoveryConfig::default()
            .replenish(&particles, None, &mut rng)
            .unwrap_err();
        assert!(matches!(
            err,
            FilterError::DimensionMismatch {
                what: "state",
                index: 2,
                len: 2
            }
        ));

        let observation = DVector::from_vec(vec![1.0]);
        let particles = vec![particle(vec![0.0; 4])];
        let err = RecoveryConfig::default()
            .replenish(&particles, Some(&observation), &mut rng)
            .unwrap_err();
        assert!(matches!(
            err,
            FilterError::DimensionMismatch {
                what: "observation",
                ..
            }
        ));
    }

    #[test]
    fn test_validate() {
        assert!(RecoveryConfig::default().validate().is_ok());
        let negative = RecoveryConfig {
            noise_upper_bound: -1.0,
            ..RecoveryConfig::default()
        };
        assert!(negative.validate().is_err());
        let overlapping = RecoveryConfig {
            context_dims: vec![0, 2],
            ..RecoveryConfig::default()
        };
        assert!(overlapping.validate().is_err());
    }
}
