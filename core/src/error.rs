//! Error types for the particle filter.
//!
//! Degeneracy, a propagation shortfall and a missing observation are not errors; they are reported
//! through the `log` facade. The variants below cover the conditions that abort a filter call.

/// Boxed error returned by the external transition and observation models.
pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias
pub type Result<T> = std::result::Result<T, FilterError>;

/// Particle filter error types
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The transition model failed to advance a sampled state
    #[error("transition model failed: {0}")]
    Transition(#[source] ModelError),

    /// The observation model failed to score a particle
    #[error("observation model failed: {0}")]
    Likelihood(#[source] ModelError),

    /// The observation model returned a negative or non-finite density
    #[error("likelihood density must be finite and non-negative, got {0}")]
    InvalidLikelihood(f64),

    /// Weights handed to the sampler cannot form a distribution
    #[error("invalid sampling weights: {0}")]
    InvalidWeights(String),

    /// Samples were requested from a set with no particles
    #[error("cannot sample from an empty particle set")]
    EmptyParticleSet,

    /// A configured index falls outside a state or observation vector
    #[error("{what} index {index} is out of range for a vector of length {len}")]
    DimensionMismatch {
        /// Which vector was indexed
        what: &'static str,
        /// The offending index
        index: usize,
        /// Length of the indexed vector
        len: usize,
    },

    /// Filter configuration failed validation
    #[error("invalid filter configuration: {0}")]
    InvalidConfig(String),
}
