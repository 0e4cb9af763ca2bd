//! Derivative-free minimization (Nelder–Mead) for the model fits.
//!
//! Both likelihoods are minimized over log-parameters, so the search
//! space is unconstrained. Non-finite objective values are treated as
//! +∞ and the simplex simply moves away from them.

use crate::config::EngineConfig;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;
const INITIAL_STEP: f64 = 1.0;
/// Fresh-simplex restarts after the first convergence.
const MAX_RESTARTS: usize = 3;

/// Settings shared by both model fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub penalizer_coef: f64,
    pub max_iterations: usize,
    pub tolerance:      f64,
    pub min_customers:  usize,
}

impl FitOptions {
    pub fn timing(config: &EngineConfig) -> Self {
        Self {
            penalizer_coef: config.penalizer_coef,
            max_iterations: config.max_iterations,
            tolerance:      config.tolerance,
            min_customers:  config.min_timing_customers,
        }
    }

    pub fn monetary(config: &EngineConfig) -> Self {
        Self {
            min_customers: config.min_monetary_customers,
            ..Self::timing(config)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub point:      Vec<f64>,
    pub value:      f64,
    pub iterations: usize,
    pub converged:  bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    max_iterations: usize,
    tolerance:      f64,
}

impl NelderMead {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self { max_iterations, tolerance }
    }

    pub fn from_options(options: &FitOptions) -> Self {
        Self::new(options.max_iterations, options.tolerance)
    }

    /// Minimize `f` from `start`, restarting from the best point until a
    /// restart no longer improves the value. The iteration budget is
    /// shared across restarts.
    pub fn minimize<F>(&self, f: F, start: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let objective = |x: &[f64]| {
            let v = f(x);
            if v.is_finite() { v } else { f64::INFINITY }
        };

        let mut best = self.run(&objective, start, self.max_iterations);
        let mut restarts = 0;
        while best.converged && restarts < MAX_RESTARTS {
            let budget = self.max_iterations.saturating_sub(best.iterations);
            if budget == 0 {
                break;
            }
            let next = self.run(&objective, &best.point, budget);
            let improvement = best.value - next.value;
            let iterations = best.iterations + next.iterations;
            restarts += 1;
            log::debug!(
                "nelder-mead restart {restarts}: {:.10} -> {:.10} ({} iterations)",
                best.value, next.value, next.iterations
            );
            if next.value <= best.value {
                // A restart that runs out of budget still started from a
                // converged point and only went downhill.
                best = Minimum { iterations, converged: true, ..next };
            } else {
                best.iterations = iterations;
            }
            if improvement.abs() <= self.tolerance * (1.0 + best.value.abs()) {
                break;
            }
        }
        best
    }

    fn run<F>(&self, f: &F, start: &[f64], budget: usize) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let dim = start.len();
        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
        simplex.push((start.to_vec(), f(start)));
        for i in 0..dim {
            let mut vertex = start.to_vec();
            vertex[i] += INITIAL_STEP;
            let value = f(&vertex);
            simplex.push((vertex, value));
        }

        let mut iterations = 0;
        let mut converged = false;
        while iterations < budget {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            if self.has_converged(&simplex) {
                converged = true;
                break;
            }
            iterations += 1;

            let worst = dim;
            let centroid = centroid(&simplex[..worst]);
            let reflected = towards(&centroid, &simplex[worst].0, -REFLECTION);
            let f_reflected = f(&reflected);

            if f_reflected < simplex[0].1 {
                let expanded = towards(&centroid, &simplex[worst].0, -EXPANSION);
                let f_expanded = f(&expanded);
                simplex[worst] = if f_expanded < f_reflected {
                    (expanded, f_expanded)
                } else {
                    (reflected, f_reflected)
                };
                continue;
            }
            if f_reflected < simplex[worst - 1].1 {
                simplex[worst] = (reflected, f_reflected);
                continue;
            }

            // Contract towards the better of the worst and reflected points.
            let (target, f_target) = if f_reflected < simplex[worst].1 {
                (reflected, f_reflected)
            } else {
                (simplex[worst].0.clone(), simplex[worst].1)
            };
            let contracted = towards(&centroid, &target, CONTRACTION);
            let f_contracted = f(&contracted);
            if f_contracted < f_target {
                simplex[worst] = (contracted, f_contracted);
                continue;
            }

            let best = simplex[0].0.clone();
            for vertex in simplex.iter_mut().skip(1) {
                vertex.0 = towards(&best, &vertex.0, SHRINK);
                vertex.1 = f(&vertex.0);
            }
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (point, value) = simplex.swap_remove(0);
        Minimum { point, value, iterations, converged }
    }

    fn has_converged(&self, sorted: &[(Vec<f64>, f64)]) -> bool {
        let best = &sorted[0];
        let worst_value = sorted[sorted.len() - 1].1;
        if !best.1.is_finite() || !worst_value.is_finite() {
            return false;
        }
        let value_spread = worst_value - best.1;
        let point_spread = sorted
            .iter()
            .skip(1)
            .flat_map(|(p, _)| p.iter().zip(&best.0).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        value_spread <= self.tolerance * (1.0 + best.1.abs()) && point_spread <= self.tolerance.sqrt()
    }
}

fn centroid(points: &[(Vec<f64>, f64)]) -> Vec<f64> {
    let dim = points[0].0.len();
    let mut c = vec![0.0; dim];
    for (p, _) in points {
        for (ci, pi) in c.iter_mut().zip(p) {
            *ci += pi;
        }
    }
    let n = points.len() as f64;
    c.iter_mut().for_each(|ci| *ci /= n);
    c
}

/// `origin + t · (target − origin)`.
fn towards(origin: &[f64], target: &[f64], t: f64) -> Vec<f64> {
    origin.iter().zip(target).map(|(o, p)| o + t * (p - o)).collect()
}
