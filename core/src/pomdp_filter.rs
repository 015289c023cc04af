//! Particle filtering toolbox for POMDP belief tracking
//!
//! This crate implements sequential importance resampling (SIR) for recursive Bayesian belief
//! tracking inside an online POMDP planner. A belief is a weighted population of hypothesized
//! world states. Each filtering cycle takes a prior belief, the action that was applied and
//! (optionally) the observation that came back, and produces a new, equally weighted belief of a
//! fixed size.
//!
//! The crate is deliberately ignorant of any particular scenario. How a state evolves under an
//! action and how likely an observation is given a state are supplied by the caller through the
//! [`models::TransitionModel`] and [`models::ObservationModel`] traits. Randomness is an explicit
//! capability: every request carries its own RNG, so independent filter calls can run on separate
//! threads without locking and seeded runs are reproducible.
//!
//! ## Modules
//!
//! - [`state`]: hypothesis states, shared through `Arc` handles, and their extensible attachments
//! - [`particle`]: particles and particle sets with uniform and weighted sampling
//! - [`sampler`]: weighted index sampling and the available resampling strategies
//! - [`models`]: the transition and observation model boundary
//! - [`filter`]: the [`filter::Filter`] trait and the SIR [`filter::ParticleFilter`]
//! - [`recovery`]: rebuilding a population whose every particle scored a zero likelihood
//! - [`estimate`]: point estimates (mean and covariance) of a belief
//! - [`config`]: filter configuration and its JSON/YAML/TOML file formats
//! - [`error`]: error types
//!
//! ## Filtering cycle
//!
//! $$
//! x_t^{(i)} \sim p(x_t \mid x_{t-1}^{(i)}, a_t), \qquad
//! w_t^{(i)} \propto w_{t-1}^{(i)} \, p(z_t \mid x_t^{(i)}, a_t)
//! $$
//!
//! followed by a multinomial resampling step that returns `N` particles of weight `1/N`.

pub mod config;
pub mod error;
pub mod estimate;
pub mod filter;
pub mod models;
pub mod particle;
pub mod recovery;
pub mod sampler;
pub mod state;

pub use config::{ConfigFile, ConfigFormat, ParticleFilterConfig};
pub use error::{FilterError, ModelError};
pub use filter::{Filter, FilterRequest, FilterResult, ParticleFilter};
pub use particle::{Particle, ParticleSet};
pub use state::{Action, Observation, RobotState, StateAttachment, StateHandle};
