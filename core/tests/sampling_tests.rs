//! Statistical tests for particle set sampling
//!
//! These tests draw a large number of samples with a seeded generator and compare the empirical
//! index frequencies with the expected distribution using a chi-square goodness-of-fit statistic.

use assert_approx_eq::assert_approx_eq;
use pomdp_filter::particle::{Particle, ParticleSet};
use pomdp_filter::sampler::{ResamplingStrategy, WeightedSampler};
use pomdp_filter::state::RobotState;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Critical value of the chi-square distribution with 3 degrees of freedom at p = 0.001
const CHI_SQUARE_CRITICAL_3_DOF: f64 = 16.266;

const NUM_DRAWS: usize = 100_000;

fn chi_square(counts: &[usize], expected_probabilities: &[f64], draws: usize) -> f64 {
    counts
        .iter()
        .zip(expected_probabilities)
        .map(|(&observed, &p)| {
            let expected = p * draws as f64;
            (observed as f64 - expected).powi(2) / expected
        })
        .sum()
}

/// Particles whose state holds their own index, so draws can be mapped back to indices.
fn indexed_particles(weights: &[f64]) -> Vec<Particle> {
    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| Particle::new(RobotState::from(vec![i as f64]).into_handle(), w))
        .collect()
}

fn count_indices(particles: &[Particle], n: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n];
    for particle in particles {
        counts[particle.state().vector()[0] as usize] += 1;
    }
    counts
}

#[test]
fn test_weighted_sampler_converges_to_weights() {
    let weights = [0.1, 0.2, 0.3, 0.4];
    let mut rng = StdRng::seed_from_u64(2024);
    let indices = WeightedSampler::default()
        .sample(&mut rng, &weights, NUM_DRAWS)
        .unwrap();
    assert_eq!(indices.len(), NUM_DRAWS);

    let mut counts = vec![0usize; weights.len()];
    for i in indices {
        counts[i] += 1;
    }
    let statistic = chi_square(&counts, &weights, NUM_DRAWS);
    println!("counts: {:?}, chi-square: {:.3}", counts, statistic);
    assert!(statistic < CHI_SQUARE_CRITICAL_3_DOF);
}

#[test]
fn test_weighted_sampler_accepts_unnormalized_weights() {
    let weights = [1.0, 2.0, 3.0, 4.0];
    let mut rng = StdRng::seed_from_u64(77);
    let indices = WeightedSampler::new(ResamplingStrategy::Multinomial)
        .sample(&mut rng, &weights, NUM_DRAWS)
        .unwrap();
    let mut counts = vec![0usize; weights.len()];
    for i in indices {
        counts[i] += 1;
    }
    let probabilities: Vec<f64> = weights.iter().map(|w| w / 10.0).collect();
    assert!(chi_square(&counts, &probabilities, NUM_DRAWS) < CHI_SQUARE_CRITICAL_3_DOF);
}

#[test]
fn test_sample_weighted_converges_to_weights() {
    let weights = [0.1, 0.2, 0.3, 0.4];
    let set = ParticleSet::from_particles(indexed_particles(&weights));
    let mut rng = StdRng::seed_from_u64(99);
    let drawn = set.sample_weighted(&mut rng, NUM_DRAWS).unwrap();
    let counts = count_indices(&drawn, weights.len());
    assert!(chi_square(&counts, &weights, NUM_DRAWS) < CHI_SQUARE_CRITICAL_3_DOF);
}

#[test]
fn test_sample_uniform_ignores_weights() {
    let weights = [0.1, 0.2, 0.3, 0.4];
    let set = ParticleSet::from_particles(indexed_particles(&weights));
    let mut rng = StdRng::seed_from_u64(5);
    let drawn = set.sample_uniform(&mut rng, NUM_DRAWS).unwrap();
    let counts = count_indices(&drawn, weights.len());
    let statistic = chi_square(&counts, &[0.25; 4], NUM_DRAWS);
    println!("counts: {:?}, chi-square: {:.3}", counts, statistic);
    assert!(statistic < CHI_SQUARE_CRITICAL_3_DOF);
}

#[test]
fn test_sample_uniform_draws_zero_weight_particles() {
    let set = ParticleSet::from_particles(indexed_particles(&[0.0, 0.0, 0.0, 1.0]));
    let mut rng = StdRng::seed_from_u64(6);
    let drawn = set.sample_uniform(&mut rng, NUM_DRAWS).unwrap();
    let counts = count_indices(&drawn, 4);
    assert!(chi_square(&counts, &[0.25; 4], NUM_DRAWS) < CHI_SQUARE_CRITICAL_3_DOF);
}

#[test]
fn test_zero_prior_becomes_uniform() {
    let set = ParticleSet::from_prior(&indexed_particles(&[0.0; 8]));
    assert_eq!(set.len(), 8);
    for particle in set.particles() {
        assert_approx_eq!(particle.weight(), 1.0 / 8.0, 1e-12);
    }
    assert_approx_eq!(set.total_weight(), 1.0, 1e-12);
}

#[test]
fn test_normalized_weights_sum_to_one() {
    let mut set = ParticleSet::from_particles(indexed_particles(&[3.7, 0.0, 1e-9, 12.5, 0.4]));
    set.normalize();
    assert_approx_eq!(set.total_weight(), 1.0, 1e-12);
    assert_eq!(set.particles()[1].weight(), 0.0);
}
