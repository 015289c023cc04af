//! Boundary traits for the external transition and observation models.
//!
//! The filter does not know how a scenario evolves or how sensors respond. Those capabilities are
//! supplied by the caller through [`TransitionModel`] and [`ObservationModel`]. Implementations
//! must be `Send + Sync` so that independent filter invocations can run on separate threads.
use crate::error::ModelError;
use crate::state::{Action, Observation, RobotState, StateHandle};

use rand::RngCore;
use std::fmt::Debug;

/// Inputs for advancing one sampled state.
#[derive(Clone, Debug)]
pub struct PropagationRequest<'a> {
    /// State the sample was drawn from
    pub current_state: &'a StateHandle,
    /// Action applied during this step
    pub action: &'a Action,
    /// Whether the model may let the state pass through a collision
    pub allow_collisions: bool,
}

/// Collision information produced by a transition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollisionReport {
    pub collides: bool,
}
impl CollisionReport {
    pub fn new(collides: bool) -> Self {
        CollisionReport { collides }
    }
}

/// Result of advancing one state.
#[derive(Clone, Debug)]
pub struct PropagationResult {
    /// Freshly built successor state. It is owned here and only shared once the filter accepts it.
    pub next_state: RobotState,
    /// `None` when the model performs no collision checking
    pub collision_report: Option<CollisionReport>,
}
impl PropagationResult {
    pub fn new(next_state: RobotState) -> Self {
        PropagationResult {
            next_state,
            collision_report: None,
        }
    }
    pub fn with_collision(next_state: RobotState, collides: bool) -> Self {
        PropagationResult {
            next_state,
            collision_report: Some(CollisionReport::new(collides)),
        }
    }
    pub fn collided(&self) -> bool {
        self.collision_report.as_ref().is_some_and(|r| r.collides)
    }
}

/// Advances a state given an action, `x' ~ p(x' | x, a)`.
pub trait TransitionModel: Debug + Send + Sync {
    /// Propagate `request.current_state` under `request.action`.
    ///
    /// Any randomness must be drawn from `rng` so that a seeded filter call is reproducible. An
    /// error aborts the whole propagation step.
    fn propagate(
        &self,
        request: &PropagationRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<PropagationResult, ModelError>;
}

/// Scores an observation against a hypothesis, `p(z | x, a)`.
pub trait ObservationModel: Debug + Send + Sync {
    /// Likelihood density of `observation` given `state` and `action`. Zero is a legal value and
    /// marks a hypothesis as inconsistent with the evidence.
    fn likelihood(
        &self,
        state: &RobotState,
        action: &Action,
        observation: &Observation,
    ) -> Result<f64, ModelError>;
}
