//! Car and pedestrian tracking scenario.
//!
//! The hidden state is `[ped_x, ped_y, car_x, car_y]`. The action is the commanded car velocity.
//! The pedestrian follows a random walk, and the car follows its command with additive Gaussian
//! noise. A state collides when the two agents are closer than the collision radius.
//!
//! The sensor measures the car's displacement over one step. The likelihood needs the state a
//! hypothesis was propagated from, which it reads through the state's back-reference.
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector2};
use pomdp_filter::error::ModelError;
use pomdp_filter::estimate::AveragingStrategy;
use pomdp_filter::filter::{Filter, FilterRequest, ParticleFilter};
use pomdp_filter::models::{
    ObservationModel, PropagationRequest, PropagationResult, TransitionModel,
};
use pomdp_filter::particle::Particle;
use pomdp_filter::state::{Action, Observation, RobotState, StateHandle};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};
use serde::Serialize;
use std::error::Error;
use std::f64::consts::PI;
use std::path::Path;

/// Error ending a trial: invalid scenario parameters or a failed filter call.
pub type TrialError = Box<dyn Error + Send + Sync>;

/// Attachment key holding the number of steps a hypothesis has been propagated.
pub const STEP_KEY: &str = "step";

/// Scenario constants
#[derive(Clone, Copy, Debug)]
pub struct ScenarioParams {
    /// Time step in seconds
    pub dt: f64,
    /// Standard deviation of the pedestrian random walk per step (m)
    pub pedestrian_sigma: f64,
    /// Standard deviation of the car motion noise per step (m)
    pub car_sigma: f64,
    /// Standard deviation of the displacement sensor (m)
    pub sensor_sigma: f64,
    /// Residuals beyond this many standard deviations get a zero likelihood
    pub gate: f64,
    /// Distance below which the agents collide (m)
    pub collision_radius: f64,
    /// Spread of the initial belief around the true state (m)
    pub initial_sigma: f64,
}
impl Default for ScenarioParams {
    fn default() -> Self {
        ScenarioParams {
            dt: 0.5,
            pedestrian_sigma: 0.3,
            car_sigma: 0.1,
            sensor_sigma: 0.2,
            gate: 4.0,
            collision_radius: 1.0,
            initial_sigma: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct CarPedestrianTransition {
    dt: f64,
    pedestrian_noise: Normal<f64>,
    car_noise: Normal<f64>,
    collision_radius: f64,
}
impl CarPedestrianTransition {
    pub fn new(params: &ScenarioParams) -> Result<Self, NormalError> {
        Ok(CarPedestrianTransition {
            dt: params.dt,
            pedestrian_noise: Normal::new(0.0, params.pedestrian_sigma)?,
            car_noise: Normal::new(0.0, params.car_sigma)?,
            collision_radius: params.collision_radius,
        })
    }
}
impl TransitionModel for CarPedestrianTransition {
    fn propagate(
        &self,
        request: &PropagationRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<PropagationResult, ModelError> {
        let current = request.current_state;
        if current.dim() != 4 || request.action.len() != 2 {
            return Err(format!(
                "expected a 4-d state and a 2-d action, got {} and {}",
                current.dim(),
                request.action.len()
            )
            .into());
        }
        let x = current.vector();
        let next = DVector::from_vec(vec![
            x[0] + self.pedestrian_noise.sample(rng),
            x[1] + self.pedestrian_noise.sample(rng),
            x[2] + request.action[0] * self.dt + self.car_noise.sample(rng),
            x[3] + request.action[1] * self.dt + self.car_noise.sample(rng),
        ]);
        let separation = Vector2::new(next[2] - next[0], next[3] - next[1]).norm();

        let step = current
            .attachment()
            .and_then(|a| a.get::<usize>(STEP_KEY))
            .copied()
            .unwrap_or(0);
        let mut next_state = RobotState::new(next);
        next_state.attachment_mut().insert(STEP_KEY, step + 1);

        Ok(PropagationResult::with_collision(
            next_state,
            separation < self.collision_radius,
        ))
    }
}

/// Gated Gaussian model of the car displacement sensor.
#[derive(Debug)]
pub struct DisplacementSensor {
    noise: Normal<f64>,
    gate: f64,
}
impl DisplacementSensor {
    pub fn new(params: &ScenarioParams) -> Result<Self, NormalError> {
        Ok(DisplacementSensor {
            noise: Normal::new(0.0, params.sensor_sigma)?,
            gate: params.gate,
        })
    }

    /// Noisy displacement of the car between `previous` and `current`.
    pub fn observe<R: Rng + ?Sized>(
        &self,
        previous: &RobotState,
        current: &RobotState,
        rng: &mut R,
    ) -> Observation {
        let (dx, dy) = car_displacement(previous, current);
        DVector::from_vec(vec![dx + self.noise.sample(rng), dy + self.noise.sample(rng)])
    }
}
impl ObservationModel for DisplacementSensor {
    fn likelihood(
        &self,
        state: &RobotState,
        _action: &Action,
        observation: &Observation,
    ) -> Result<f64, ModelError> {
        let previous = state
            .previous_state()
            .ok_or("hypothesis has no previous state")?;
        let (dx, dy) = car_displacement(&previous, state);
        let sigma = self.noise.std_dev();
        let rx = (observation[0] - dx) / sigma;
        let ry = (observation[1] - dy) / sigma;
        if rx.abs() > self.gate || ry.abs() > self.gate {
            return Ok(0.0);
        }
        Ok((-0.5 * (rx * rx + ry * ry)).exp() / (2.0 * PI * sigma * sigma))
    }
}

fn car_displacement(previous: &RobotState, current: &RobotState) -> (f64, f64) {
    let p = previous.vector();
    let c = current.vector();
    (c[2] - p[2], c[3] - p[3])
}

/// Commanded car velocity at a given step: steady forward motion with a gentle weave.
pub fn commanded_velocity(step: usize) -> Action {
    DVector::from_vec(vec![1.0, 0.5 * (0.2 * step as f64).sin()])
}

/// Options shared by every trial.
#[derive(Clone, Copy, Debug)]
pub struct TrialOptions {
    pub num_particles: usize,
    pub steps: usize,
    pub allow_collisions: bool,
    pub allow_terminal_states: bool,
    pub averaging: AveragingStrategy,
}

/// One row of simulation output.
#[derive(Clone, Debug, Serialize)]
pub struct StepRecord {
    pub trial: usize,
    pub step: usize,
    pub true_ped_x: f64,
    pub true_ped_y: f64,
    pub true_car_x: f64,
    pub true_car_y: f64,
    pub est_ped_x: f64,
    pub est_ped_y: f64,
    pub est_car_x: f64,
    pub est_car_y: f64,
    pub car_error: f64,
    pub pedestrian_error: f64,
    pub car_std: f64,
    /// Effective sample size of the reweighted belief; empty when it was replenished
    pub effective_sample_size: Option<f64>,
    pub particles: usize,
    pub replenished: bool,
    pub true_collision: bool,
}

/// Write records to a CSV file with a header row.
pub fn write_records<P: AsRef<Path>>(records: &[StepRecord], path: P) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Initial belief scattered around the true state. Weights start at zero, which the filter treats
/// as a uniform prior.
fn initial_belief<R: Rng + ?Sized>(
    truth: &StateHandle,
    num_particles: usize,
    sigma: f64,
    rng: &mut R,
) -> Result<Vec<Particle>, NormalError> {
    let spread = Normal::new(0.0, sigma)?;
    Ok((0..num_particles)
        .map(|_| {
            let vector = truth.vector().map(|v| v + spread.sample(rng));
            Particle::new(RobotState::new(vector).into_handle(), 0.0)
        })
        .collect())
}

/// Run one seeded trial and return a record per step.
pub fn run_trial(
    trial: usize,
    seed: u64,
    filter: &ParticleFilter,
    params: &ScenarioParams,
    options: &TrialOptions,
) -> Result<Vec<StepRecord>, TrialError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let transition = CarPedestrianTransition::new(params)?;
    let sensor = DisplacementSensor::new(params)?;

    let mut truth = RobotState::from(vec![8.0, 3.0, 0.0, 0.0]).into_handle();
    let mut belief =
        initial_belief(&truth, options.num_particles, params.initial_sigma, &mut rng)?;
    let mut records = Vec::with_capacity(options.steps);

    for step in 0..options.steps {
        let action = commanded_velocity(step);
        let propagation = transition
            .propagate(
                &PropagationRequest {
                    current_state: &truth,
                    action: &action,
                    allow_collisions: true,
                },
                &mut rng,
            )?;
        let true_collision = propagation.collided();
        let mut next_truth = propagation.next_state;
        next_truth.attachment_mut().set_previous_state(&truth);
        let observation = sensor.observe(&truth, &next_truth, &mut rng);
        truth = next_truth.into_handle();

        let mut request = FilterRequest::new(
            belief,
            options.num_particles,
            action,
            &transition,
            &sensor,
            &mut rng,
        )
        .with_observation(observation)
        .allow_collisions(options.allow_collisions)
        .allow_terminal_states(options.allow_terminal_states);
        let result = filter.filter(&mut request)?;
        if result.replenished {
            warn!("Trial {} step {}: belief was replenished", trial, step);
        }

        let (mean, cov) = options
            .averaging
            .estimate(&result.particles)
            .unwrap_or_else(|| (DVector::from_element(4, f64::NAN), DMatrix::zeros(4, 4)));
        let x = truth.vector();
        records.push(StepRecord {
            trial,
            step,
            true_ped_x: x[0],
            true_ped_y: x[1],
            true_car_x: x[2],
            true_car_y: x[3],
            est_ped_x: mean[0],
            est_ped_y: mean[1],
            est_car_x: mean[2],
            est_car_y: mean[3],
            car_error: Vector2::new(mean[2] - x[2], mean[3] - x[3]).norm(),
            pedestrian_error: Vector2::new(mean[0] - x[0], mean[1] - x[1]).norm(),
            car_std: (0.5 * (cov[(2, 2)] + cov[(3, 3)])).sqrt(),
            effective_sample_size: result.effective_sample_size,
            particles: result.len(),
            replenished: result.replenished,
            true_collision,
        });
        debug!(
            "Trial {} step {}: car error {:.3} m with {} particles",
            trial,
            step,
            records[records.len() - 1].car_error,
            result.len()
        );
        belief = result.particles;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use pomdp_filter::config::ParticleFilterConfig;
    use tempfile::Builder;

    fn options(steps: usize) -> TrialOptions {
        TrialOptions {
            num_particles: 300,
            steps,
            allow_collisions: true,
            allow_terminal_states: false,
            averaging: AveragingStrategy::WeightedAverage,
        }
    }

    #[test]
    fn test_transition_flags_collisions_and_counts_steps() {
        let params = ScenarioParams {
            pedestrian_sigma: 1e-9,
            car_sigma: 1e-9,
            ..ScenarioParams::default()
        };
        let transition = CarPedestrianTransition::new(&params).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut start = RobotState::from(vec![0.5, 0.0, 0.0, 0.0]);
        start.attachment_mut().insert(STEP_KEY, 4usize);
        let start = start.into_handle();
        let action = DVector::from_vec(vec![1.0, 0.0]);
        let result = transition
            .propagate(
                &PropagationRequest {
                    current_state: &start,
                    action: &action,
                    allow_collisions: false,
                },
                &mut rng,
            )
            .unwrap();
        assert!(result.collided());
        assert_approx_eq!(result.next_state.vector()[2], 0.5, 1e-6);
        let step = result
            .next_state
            .attachment()
            .and_then(|a| a.get::<usize>(STEP_KEY))
            .copied();
        assert_eq!(step, Some(5));
    }

    #[test]
    fn test_transition_rejects_wrong_dimensions() {
        let transition = CarPedestrianTransition::new(&ScenarioParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let start = RobotState::from(vec![0.0, 0.0]).into_handle();
        let action = DVector::from_vec(vec![1.0, 0.0]);
        let request = PropagationRequest {
            current_state: &start,
            action: &action,
            allow_collisions: false,
        };
        assert!(transition.propagate(&request, &mut rng).is_err());
    }

    #[test]
    fn test_sensor_likelihood() {
        let sensor = DisplacementSensor::new(&ScenarioParams::default()).unwrap();
        let previous = RobotState::from(vec![0.0, 0.0, 0.0, 0.0]).into_handle();
        let mut state = RobotState::from(vec![0.0, 0.0, 1.0, 0.0]);
        state.attachment_mut().set_previous_state(&previous);
        let action = DVector::from_vec(vec![1.0, 0.0]);

        let exact = DVector::from_vec(vec![1.0, 0.0]);
        let peak = sensor.likelihood(&state, &action, &exact).unwrap();
        assert_approx_eq!(peak, 1.0 / (2.0 * PI * 0.04), 1e-9);

        let near = DVector::from_vec(vec![1.2, 0.0]);
        assert!(sensor.likelihood(&state, &action, &near).unwrap() < peak);

        let outside_gate = DVector::from_vec(vec![3.0, 0.0]);
        assert_eq!(
            sensor.likelihood(&state, &action, &outside_gate).unwrap(),
            0.0
        );

        let orphan = RobotState::from(vec![0.0, 0.0, 1.0, 0.0]);
        assert!(sensor.likelihood(&orphan, &action, &exact).is_err());
    }

    #[test]
    fn test_trial_tracks_the_car() {
        let filter = ParticleFilter::new(ParticleFilterConfig::default()).unwrap();
        // The sensor only sees displacements, so the initial spread bounds the position error.
        let params = ScenarioParams {
            initial_sigma: 0.1,
            ..ScenarioParams::default()
        };
        let records = run_trial(0, 11, &filter, &params, &options(20)).unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.particles > 0));
        let last = &records[records.len() - 1];
        assert!(last.car_error < 1.5, "car error {}", last.car_error);
        assert_eq!(last.step, 19);
    }

    #[test]
    fn test_trials_are_reproducible() {
        let filter = ParticleFilter::default();
        let params = ScenarioParams::default();
        let a = run_trial(0, 5, &filter, &params, &options(5)).unwrap();
        let b = run_trial(0, 5, &filter, &params, &options(5)).unwrap();
        let errors = |records: &[StepRecord]| -> Vec<f64> {
            records.iter().map(|r| r.car_error).collect()
        };
        assert_eq!(errors(&a), errors(&b));
    }

    #[test]
    fn test_invalid_parameters_end_the_trial() {
        let filter = ParticleFilter::default();
        let params = ScenarioParams {
            sensor_sigma: -1.0,
            ..ScenarioParams::default()
        };
        let err = run_trial(0, 1, &filter, &params, &options(2)).unwrap_err();
        assert!(err.downcast_ref::<NormalError>().is_some());
    }

    #[test]
    fn test_records_carry_effective_sample_size() {
        let filter = ParticleFilter::default();
        let records = run_trial(0, 2, &filter, &ScenarioParams::default(), &options(4)).unwrap();
        for record in records.iter().filter(|r| !r.replenished) {
            let ess = record.effective_sample_size.unwrap();
            assert!(ess > 0.0 && ess <= 300.0 + 1e-9, "ess {}", ess);
        }
    }

    #[test]
    fn test_write_records() {
        let filter = ParticleFilter::default();
        let records = run_trial(3, 1, &filter, &ScenarioParams::default(), &options(3)).unwrap();
        let file = Builder::new().suffix(".csv").tempfile().unwrap();
        write_records(&records, file.path()).unwrap();

        let mut reader = csv::Reader::from_path(file.path()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "trial");
        assert_eq!(&headers[headers.len() - 1], "true_collision");
        assert_eq!(reader.records().count(), 3);
    }
}
