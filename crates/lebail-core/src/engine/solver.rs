//! Bounded Levenberg-Marquardt least-squares solver.
//!
//! Minimizes `Σ r_i(x)²` subject to box bounds on `x`. Steps are projected back into
//! the box; parameters sitting on a bound whose gradient points outward, and
//! parameters the residuals do not depend on, are held fixed for that iteration.
//!
//! Each accepted step is compared with the reduction its linearized model predicted.
//! The cost and step tolerances only end the solve when that gain ratio is close to
//! one and the undamped Gauss-Newton step from the same point is itself within
//! tolerance, so a step shrunk by heavy damping never reads as convergence.

use super::config::SolverConfig;
use super::parameters::Bound;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e10;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
/// Growth of λ after an accepted step the linear model predicted poorly.
const LAMBDA_NUDGE: f64 = 2.0;
const RATIO_GOOD: f64 = 0.75;
const RATIO_POOR: f64 = 0.25;
/// Gain ratios inside this range count as agreement with the linear model.
const RATIO_TRUSTED: (f64, f64) = (0.5, 2.0);
/// Floor of the Marquardt scaling diagonal, so flat directions still receive damping.
const DIAGONAL_FLOOR: f64 = 1e-12;
const SVD_EPSILON: f64 = 1e-14;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("{parameters} parameters but {bounds} bounds were supplied")]
    BoundsMismatch { parameters: usize, bounds: usize },
    #[error("Residuals are not finite at the starting point")]
    NonFiniteResidual,
}

/// A vector-valued residual function of a flat parameter slice.
pub trait ResidualModel: Sync {
    fn residual_count(&self) -> usize;

    /// Writes the residuals for `params` into `out` (length [`Self::residual_count`]).
    fn residuals(&self, params: &[f64], out: &mut [f64]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Relative cost reduction fell below `ftol`.
    CostTolerance,
    /// Relative step fell below `xtol`.
    StepTolerance,
    /// Projected gradient fell below `gtol`.
    GradientTolerance,
    /// No step reduced the cost even with maximal damping.
    DampingSaturated,
    /// Every parameter is pinned or has no influence on the residuals.
    NoFreeParameters,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    pub parameters: Vec<f64>,
    pub initial_cost: f64,
    pub cost: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

impl SolverOutcome {
    pub fn converged(&self) -> bool {
        self.termination != Termination::MaxIterations
    }
}

pub struct BoundedLevenbergMarquardt {
    config: SolverConfig,
}

impl BoundedLevenbergMarquardt {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn solve<M: ResidualModel>(
        &self,
        model: &M,
        initial: &[f64],
        bounds: &[Bound],
    ) -> Result<SolverOutcome, SolverError> {
        let n = initial.len();
        if bounds.len() != n {
            return Err(SolverError::BoundsMismatch {
                parameters: n,
                bounds: bounds.len(),
            });
        }
        let m = model.residual_count();

        let mut x = DVector::from_iterator(
            n,
            initial.iter().zip(bounds).map(|(&v, b)| b.clamp(v)),
        );
        let mut r = DVector::zeros(m);
        model.residuals(x.as_slice(), r.as_mut_slice());
        if r.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NonFiniteResidual);
        }

        let mut cost = r.norm_squared();
        let initial_cost = cost;
        let mut evaluations = 1;
        let mut iterations = 0;
        let mut lambda = self.config.initial_lambda;
        let mut termination = Termination::MaxIterations;

        if n == 0 || m == 0 {
            termination = Termination::NoFreeParameters;
        }

        let mut trial_r = DVector::zeros(m);

        'outer: while termination == Termination::MaxIterations
            && iterations < self.config.max_iterations
        {
            iterations += 1;

            let jacobian = self.jacobian(model, &x, &r, bounds);
            evaluations += n;
            let gradient = jacobian.transpose() * &r;

            let free: Vec<usize> = (0..n)
                .filter(|&j| {
                    let influential = jacobian.column(j).norm_squared() > 0.0;
                    let pinned_low = x[j] <= bounds[j].lower && gradient[j] > 0.0;
                    let pinned_high = x[j] >= bounds[j].upper && gradient[j] < 0.0;
                    influential && !pinned_low && !pinned_high
                })
                .collect();
            if free.is_empty() {
                termination = Termination::NoFreeParameters;
                break;
            }

            let gradient_norm = free
                .iter()
                .map(|&j| gradient[j].abs())
                .fold(0.0, f64::max);
            if gradient_norm <= self.config.gtol {
                termination = Termination::GradientTolerance;
                break;
            }

            let reduced = jacobian.select_columns(free.iter());
            let normal = reduced.transpose() * &reduced;
            let rhs = DVector::from_iterator(free.len(), free.iter().map(|&j| -gradient[j]));

            // What an undamped step could still achieve from here.
            let (potential, gauss_newton_norm) = match damped_step(&normal, &rhs, 0.0) {
                Some(full) => {
                    let projected = free
                        .iter()
                        .zip(full.iter())
                        .map(|(&j, &d)| (bounds[j].clamp(x[j] + d) - x[j]).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    (rhs.dot(&full).clamp(0.0, cost), projected)
                }
                None => (cost, f64::INFINITY),
            };

            loop {
                let accepted = match damped_step(&normal, &rhs, lambda) {
                    Some(step) => {
                        let mut trial = x.clone();
                        for (k, &j) in free.iter().enumerate() {
                            trial[j] = bounds[j].clamp(x[j] + step[k]);
                        }
                        model.residuals(trial.as_slice(), trial_r.as_mut_slice());
                        evaluations += 1;
                        let trial_cost = trial_r.norm_squared();
                        (trial_cost.is_finite() && trial_cost < cost).then_some((trial, trial_cost))
                    }
                    None => None,
                };

                if let Some((trial, trial_cost)) = accepted {
                    let taken = DVector::from_iterator(
                        free.len(),
                        free.iter().map(|&j| trial[j] - x[j]),
                    );
                    let predicted = predicted_reduction(&normal, &rhs, &taken);
                    let actual = cost - trial_cost;
                    let ratio = if predicted > f64::EPSILON * cost {
                        actual / predicted
                    } else {
                        1.0
                    };
                    let trusted = (RATIO_TRUSTED.0..=RATIO_TRUSTED.1).contains(&ratio);
                    let tolerance_scale = self.config.xtol * (x.norm() + self.config.xtol);
                    let previous_cost = cost;

                    x = trial;
                    std::mem::swap(&mut r, &mut trial_r);
                    cost = trial_cost;
                    if ratio > RATIO_GOOD {
                        lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);
                    } else if ratio < RATIO_POOR {
                        lambda = (lambda * LAMBDA_NUDGE).min(MAX_LAMBDA);
                    }
                    trace!(iteration = iterations, cost, lambda, ratio, "LM step accepted");

                    let ftol = self.config.ftol * previous_cost;
                    if trusted && actual <= ftol && potential <= ftol {
                        termination = Termination::CostTolerance;
                    } else if trusted && gauss_newton_norm <= tolerance_scale {
                        termination = Termination::StepTolerance;
                    }
                    continue 'outer;
                }

                lambda *= LAMBDA_UP;
                if lambda > MAX_LAMBDA {
                    termination = Termination::DampingSaturated;
                    continue 'outer;
                }
            }
        }

        Ok(SolverOutcome {
            parameters: x.iter().copied().collect(),
            initial_cost,
            cost,
            iterations,
            evaluations,
            termination,
        })
    }

    /// Forward-difference Jacobian; steps that would leave the box are taken backwards.
    fn jacobian<M: ResidualModel>(
        &self,
        model: &M,
        x: &DVector<f64>,
        r: &DVector<f64>,
        bounds: &[Bound],
    ) -> DMatrix<f64> {
        let m = r.len();
        let base: Vec<f64> = x.iter().copied().collect();

        let column = |j: usize| -> Vec<f64> {
            let mut h = self.config.diff_step * base[j].abs().max(1.0);
            if base[j] + h > bounds[j].upper {
                h = -h;
            }
            let mut shifted = base.clone();
            shifted[j] += h;
            let mut out = vec![0.0; m];
            model.residuals(&shifted, &mut out);
            out.iter()
                .zip(r.iter())
                .map(|(perturbed, reference)| {
                    let d = (perturbed - reference) / h;
                    if d.is_finite() { d } else { 0.0 }
                })
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let columns: Vec<Vec<f64>> = (0..base.len()).map(column).collect();

        #[cfg(feature = "parallel")]
        let columns: Vec<Vec<f64>> = (0..base.len()).into_par_iter().map(column).collect();

        DMatrix::from_fn(m, base.len(), |i, j| columns[j][i])
    }
}

/// Cost reduction `‖r‖² - ‖r + Jδ‖²` the linearized model predicts for step `δ`, with
/// `rhs = -Jᵀr` and `normal = JᵀJ`.
fn predicted_reduction(normal: &DMatrix<f64>, rhs: &DVector<f64>, step: &DVector<f64>) -> f64 {
    2.0 * rhs.dot(step) - step.dot(&(normal * step))
}

/// Solves `(JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr`, falling back to SVD when the damped normal
/// matrix is not numerically positive definite.
fn damped_step(normal: &DMatrix<f64>, rhs: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut damped = normal.clone();
    for i in 0..damped.nrows() {
        damped[(i, i)] += lambda * normal[(i, i)].max(DIAGONAL_FLOOR);
    }
    let step = match damped.clone().cholesky() {
        Some(cholesky) => cholesky.solve(rhs),
        None => damped.svd(true, true).solve(rhs, SVD_EPSILON).ok()?,
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExponentialDecay {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl ExponentialDecay {
        fn new(a: f64, b: f64) -> Self {
            let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
            let y = t.iter().map(|&t| a * (-b * t).exp()).collect();
            Self { t, y }
        }
    }

    impl ResidualModel for ExponentialDecay {
        fn residual_count(&self) -> usize {
            self.t.len()
        }

        fn residuals(&self, params: &[f64], out: &mut [f64]) {
            for ((o, &t), &y) in out.iter_mut().zip(&self.t).zip(&self.y) {
                *o = y - params[0] * (-params[1] * t).exp();
            }
        }
    }

    /// `y = p0 · (1 + p1 · t)` sampled densely, with parameters seven decades apart.
    struct ScaledLine {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl ScaledLine {
        fn new(amplitude: f64, slope: f64) -> Self {
            let t: Vec<f64> = (0..200).map(|i| i as f64).collect();
            let y = t.iter().map(|&t| amplitude * (1.0 + slope * t)).collect();
            Self { t, y }
        }
    }

    impl ResidualModel for ScaledLine {
        fn residual_count(&self) -> usize {
            self.t.len()
        }

        fn residuals(&self, params: &[f64], out: &mut [f64]) {
            for ((o, &t), &y) in out.iter_mut().zip(&self.t).zip(&self.y) {
                *o = y - params[0] * (1.0 + params[1] * t);
            }
        }
    }

    struct Rosenbrock;

    impl ResidualModel for Rosenbrock {
        fn residual_count(&self) -> usize {
            2
        }

        fn residuals(&self, p: &[f64], out: &mut [f64]) {
            out[0] = 10.0 * (p[1] - p[0] * p[0]);
            out[1] = 1.0 - p[0];
        }
    }

    /// Residuals `p0 - 5` with a second parameter the residuals ignore.
    struct ConstantTarget;

    impl ResidualModel for ConstantTarget {
        fn residual_count(&self) -> usize {
            3
        }

        fn residuals(&self, p: &[f64], out: &mut [f64]) {
            out.fill(p[0] - 5.0);
        }
    }

    fn wide(n: usize) -> Vec<Bound> {
        vec![Bound::new(-100.0, 100.0); n]
    }

    #[test]
    fn recovers_exponential_decay_parameters() {
        let model = ExponentialDecay::new(2.0, 0.5);
        let solver = BoundedLevenbergMarquardt::new(SolverConfig::default());
        let outcome = solver.solve(&model, &[1.0, 1.0], &wide(2)).unwrap();
        assert!(outcome.converged());
        assert!((outcome.parameters[0] - 2.0).abs() < 1e-5);
        assert!((outcome.parameters[1] - 0.5).abs() < 1e-5);
        assert!(outcome.cost < outcome.initial_cost);
    }

    #[test]
    fn solution_outside_the_box_settles_on_the_bound() {
        let solver = BoundedLevenbergMarquardt::new(SolverConfig::default());
        let bounds = vec![Bound::new(0.0, 3.0), Bound::new(-1.0, 1.0)];
        let outcome = solver.solve(&ConstantTarget, &[1.0, 0.25], &bounds).unwrap();
        assert!((outcome.parameters[0] - 3.0).abs() < 1e-12);
        assert!(outcome.converged());
    }

    #[test]
    fn parameters_without_influence_are_left_untouched() {
        let solver = BoundedLevenbergMarquardt::new(SolverConfig::default());
        let outcome = solver.solve(&ConstantTarget, &[1.0, 0.25], &wide(2)).unwrap();
        assert!((outcome.parameters[0] - 5.0).abs() < 1e-6);
        assert_eq!(outcome.parameters[1], 0.25);
    }

    #[test]
    fn starting_point_is_clamped_into_the_box() {
        let config = SolverConfig {
            max_iterations: 0,
            ..SolverConfig::default()
        };
        let solver = BoundedLevenbergMarquardt::new(config);
        let bounds = vec![Bound::new(0.0, 3.0), Bound::new(-1.0, 1.0)];
        let outcome = solver.solve(&ConstantTarget, &[10.0, -4.0], &bounds).unwrap();
        assert_eq!(outcome.parameters, vec![3.0, -1.0]);
    }

    #[test]
    fn exhausting_the_iteration_budget_is_reported() {
        let config = SolverConfig {
            max_iterations: 1,
            ..SolverConfig::default()
        };
        let solver = BoundedLevenbergMarquardt::new(config);
        let outcome = solver.solve(&Rosenbrock, &[-1.2, 1.0], &wide(2)).unwrap();
        assert_eq!(outcome.termination, Termination::MaxIterations);
        assert!(!outcome.converged());
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn rosenbrock_is_solved_with_enough_iterations() {
        let config = SolverConfig {
            max_iterations: 200,
            ..SolverConfig::default()
        };
        let solver = BoundedLevenbergMarquardt::new(config);
        let outcome = solver.solve(&Rosenbrock, &[-1.2, 1.0], &wide(2)).unwrap();
        assert!((outcome.parameters[0] - 1.0).abs() < 1e-4);
        assert!((outcome.parameters[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn heavily_damped_first_steps_do_not_end_the_solve() {
        let config = SolverConfig {
            initial_lambda: 1e8,
            ..SolverConfig::default()
        };
        let solver = BoundedLevenbergMarquardt::new(config);
        let model = ExponentialDecay::new(2.0, 0.5);
        let outcome = solver.solve(&model, &[1.0, 1.0], &wide(2)).unwrap();
        assert!(outcome.iterations > 1);
        assert!(outcome.converged());
        assert!((outcome.parameters[0] - 2.0).abs() < 1e-5);
        assert!((outcome.parameters[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn badly_scaled_parameters_are_both_recovered() {
        let solver = BoundedLevenbergMarquardt::new(SolverConfig::default());
        let model = ScaledLine::new(3.0e4, -2.0e-3);
        let bounds = vec![Bound::new(0.0, 1.0e5), Bound::new(-1.0, 1.0)];
        let outcome = solver.solve(&model, &[1.0e4, 0.0], &bounds).unwrap();
        assert!(outcome.converged());
        assert!((outcome.parameters[0] / 3.0e4 - 1.0).abs() < 1e-6);
        assert!((outcome.parameters[1] + 2.0e-3).abs() < 1e-7);
    }

    #[test]
    fn mismatched_bounds_are_rejected() {
        let solver = BoundedLevenbergMarquardt::new(SolverConfig::default());
        let result = solver.solve(&Rosenbrock, &[0.0, 0.0], &wide(1));
        assert_eq!(
            result,
            Err(SolverError::BoundsMismatch {
                parameters: 2,
                bounds: 1
            })
        );
    }
}
