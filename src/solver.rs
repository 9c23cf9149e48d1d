//! Adaptive Runge–Kutta integration of `y' = f(t, y)`.
//!
//! The integrator is the Dormand–Prince 5(4) embedded pair with local error
//! control. Every accepted step also stores the coefficients of the pair's
//! 4th-order continuous extension, so the returned [`Solution`] can be
//! evaluated anywhere in `[t0, tf]` without integrating again.

use thiserror::Error;
use tracing::debug;

use crate::compiler::EvalError;

pub const DEFAULT_RTOL: f64 = 1e-5;
pub const DEFAULT_ATOL: f64 = 1e-6;
pub const DEFAULT_MAX_STEPS: usize = 100_000;

// Step size control.
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
/// Order of the embedded error estimator.
const ERROR_ORDER: f64 = 4.0;

// Dormand–Prince tableau.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Error weights (5th - 4th order)
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

// Continuous extension
const D1: f64 = -12715105075.0 / 11282082432.0;
const D3: f64 = 87487479700.0 / 32700410799.0;
const D4: f64 = -10690763975.0 / 1880347072.0;
const D5: f64 = 701980252875.0 / 199316789632.0;
const D6: f64 = -1453857185.0 / 822651844.0;
const D7: f64 = 69997945.0 / 29380423.0;

/// Tolerances and limits of the integrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
  /// Relative error tolerance per step.
  pub rtol: f64,
  /// Absolute error tolerance per step.
  pub atol: f64,
  /// Attempted steps (accepted plus rejected) before giving up.
  pub max_steps: usize,
}

impl Default for SolverOptions {
  fn default() -> Self {
    Self {
      rtol: DEFAULT_RTOL,
      atol: DEFAULT_ATOL,
      max_steps: DEFAULT_MAX_STEPS,
    }
  }
}

impl SolverOptions {
  pub fn with_rtol(mut self, rtol: f64) -> Self {
    self.rtol = rtol;
    self
  }

  pub fn with_atol(mut self, atol: f64) -> Self {
    self.atol = atol;
    self
  }

  pub fn with_max_steps(mut self, max_steps: usize) -> Self {
    self.max_steps = max_steps;
    self
  }
}

/// Initial condition `y(t0) = y0` and the end of the interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationRequest {
  pub t0: f64,
  pub y0: f64,
  pub tf: f64,
}

impl IntegrationRequest {
  pub fn new(t0: f64, y0: f64, tf: f64) -> Self {
    Self { t0, y0, tf }
  }

  /// Checks that all values are finite and that `tf > t0`.
  pub fn validate(&self) -> Result<(), SolveError> {
    for (name, value) in [("t0", self.t0), ("y0", self.y0), ("tf", self.tf)] {
      if !value.is_finite() {
        return Err(SolveError::InvalidInput { name, value });
      }
    }
    if self.tf <= self.t0 {
      return Err(SolveError::InvalidRange {
        t0: self.t0,
        tf: self.tf,
      });
    }
    Ok(())
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
  #[error("The final time (tf = {tf}) must be greater than the initial time (t0 = {t0})")]
  InvalidRange { t0: f64, tf: f64 },
  #[error("{name} must be a finite number, got {value}")]
  InvalidInput { name: &'static str, value: f64 },
  #[error("The equation could not be evaluated: {source}")]
  EvaluationFailure { source: EvalError },
  #[error("Could not solve the differential equation: {reason} (at t = {t})")]
  DivergedOrFailed { t: f64, reason: String },
}

impl SolveError {
  fn diverged(t: f64, reason: impl Into<String>) -> Self {
    SolveError::DivergedOrFailed {
      t,
      reason: reason.into(),
    }
  }
}

/// Counters collected while integrating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverStats {
  /// Right-hand side evaluations.
  pub nfev: usize,
  pub naccept: usize,
  pub nreject: usize,
}

/// Continuous extension of one accepted step.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
  t_old: f64,
  t_new: f64,
  h: f64,
  coeffs: [f64; 5],
}

impl Segment {
  fn eval(&self, t: f64) -> f64 {
    let theta = (t - self.t_old) / self.h;
    let theta1 = 1.0 - theta;
    let [r1, r2, r3, r4, r5] = self.coeffs;
    r1 + theta * (r2 + theta1 * (r3 + theta * (r4 + theta1 * r5)))
  }
}

/// Dense solution of an initial value problem over `[t0, tf]`.
///
/// Created only by [`solve`] on success and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
  request: IntegrationRequest,
  segments: Vec<Segment>,
  y_final: f64,
  success: bool,
  stats: SolverStats,
}

impl Solution {
  pub fn request(&self) -> IntegrationRequest {
    self.request
  }

  pub fn t0(&self) -> f64 {
    self.request.t0
  }

  pub fn tf(&self) -> f64 {
    self.request.tf
  }

  /// `y(tf)` at full precision.
  pub fn y_final(&self) -> f64 {
    self.y_final
  }

  pub fn success(&self) -> bool {
    self.success
  }

  pub fn stats(&self) -> SolverStats {
    self.stats
  }

  /// Times of the accepted steps, starting with `t0` and ending with `tf`.
  pub fn step_times(&self) -> impl Iterator<Item = f64> + '_ {
    std::iter::once(self.request.t0)
      .chain(self.segments.iter().map(|s| s.t_new))
  }

  /// Evaluates `y(t)`, or `None` outside `[t0, tf]`.
  pub fn evaluate(&self, t: f64) -> Option<f64> {
    if !(self.request.t0..=self.request.tf).contains(&t) {
      return None;
    }
    if t == self.request.tf {
      return Some(self.y_final);
    }
    if t == self.request.t0 {
      return Some(self.request.y0);
    }
    let idx = self
      .segments
      .partition_point(|s| s.t_old <= t)
      .saturating_sub(1);
    self.segments.get(idx).map(|s| s.eval(t))
  }

  /// Evaluates `y(t)` with `t` clamped to `[t0, tf]`.
  pub fn value_at(&self, t: f64) -> f64 {
    let clamped = t.max(self.request.t0).min(self.request.tf);
    self.evaluate(clamped).unwrap_or(self.y_final)
  }
}

/// Integrates `y' = f(t, y)` from `request.t0` to `request.tf`.
///
/// # Errors
///
/// - [`SolveError::InvalidInput`] / [`SolveError::InvalidRange`] before any
///   evaluation of `f`.
/// - [`SolveError::EvaluationFailure`] as soon as `f` fails.
/// - [`SolveError::DivergedOrFailed`] when the step budget is exhausted, the
///   step size underflows, or the solution stops being finite.
pub fn solve<F>(
  mut f: F,
  request: IntegrationRequest,
  options: &SolverOptions,
) -> Result<Solution, SolveError>
where
  F: FnMut(f64, f64) -> Result<f64, EvalError>,
{
  request.validate()?;
  let IntegrationRequest { t0, y0, tf } = request;
  let SolverOptions {
    rtol,
    atol,
    max_steps,
  } = *options;

  let mut stats = SolverStats::default();
  let mut rhs = |t: f64, y: f64| -> Result<f64, SolveError> {
    if !y.is_finite() {
      return Err(SolveError::diverged(t, "the solution is no longer finite"));
    }
    stats.nfev += 1;
    f(t, y).map_err(|source| SolveError::EvaluationFailure { source })
  };

  let mut t = t0;
  let mut y = y0;
  let mut k1 = rhs(t, y)?;
  let mut h_abs = initial_step(&mut rhs, t, y, k1, tf - t0, rtol, atol)?;

  let mut segments = Vec::new();
  let mut naccept = 0usize;
  let mut nreject = 0usize;

  while t < tf {
    let min_step = 10.0 * spacing(t);
    h_abs = h_abs.max(min_step);
    let mut step_rejected = false;

    // Retry the step from (t, y) until the error estimate is acceptable.
    let (t_new, y_new, k7, segment) = loop {
      if naccept + nreject >= max_steps {
        return Err(SolveError::diverged(
          t,
          format!("exceeded the maximum of {max_steps} steps"),
        ));
      }
      // Only reachable after a rejection shrank the step.
      if h_abs < min_step {
        return Err(SolveError::diverged(
          t,
          "the required step size is smaller than the floating point spacing",
        ));
      }

      let mut t_new = t + h_abs;
      if t_new > tf {
        t_new = tf;
      }
      let h = t_new - t;

      let k2 = rhs(t + C2 * h, y + h * A21 * k1)?;
      let k3 = rhs(t + C3 * h, y + h * (A31 * k1 + A32 * k2))?;
      let k4 = rhs(t + C4 * h, y + h * (A41 * k1 + A42 * k2 + A43 * k3))?;
      let k5 = rhs(
        t + C5 * h,
        y + h * (A51 * k1 + A52 * k2 + A53 * k3 + A54 * k4),
      )?;
      let k6 = rhs(
        t + h,
        y + h * (A61 * k1 + A62 * k2 + A63 * k3 + A64 * k4 + A65 * k5),
      )?;
      let y5 = y + h * (B1 * k1 + B3 * k3 + B4 * k4 + B5 * k5 + B6 * k6);
      // FSAL: k7 is the first stage of the next step.
      let k7 = rhs(t_new, y5)?;

      let y_err =
        h * (E1 * k1 + E3 * k3 + E4 * k4 + E5 * k5 + E6 * k6 + E7 * k7);
      let scale = atol + rtol * y.abs().max(y5.abs());
      let err = (y_err / scale).abs();

      if err < 1.0 {
        let factor = if err == 0.0 {
          MAX_FACTOR
        } else {
          (SAFETY * err.powf(-1.0 / (ERROR_ORDER + 1.0))).min(MAX_FACTOR)
        };
        let factor = if step_rejected { factor.min(1.0) } else { factor };
        h_abs = h * factor;

        let ydiff = y5 - y;
        let bspl = h * k1 - ydiff;
        let segment = Segment {
          t_old: t,
          t_new,
          h,
          coeffs: [
            y,
            ydiff,
            bspl,
            ydiff - h * k7 - bspl,
            h * (D1 * k1 + D3 * k3 + D4 * k4 + D5 * k5 + D6 * k6 + D7 * k7),
          ],
        };
        break (t_new, y5, k7, segment);
      }

      let factor = if err.is_finite() {
        (SAFETY * err.powf(-1.0 / (ERROR_ORDER + 1.0))).max(MIN_FACTOR)
      } else {
        MIN_FACTOR
      };
      h_abs = h * factor;
      step_rejected = true;
      nreject += 1;
    };

    segments.push(segment);
    naccept += 1;
    t = t_new;
    y = y_new;
    k1 = k7;
  }

  stats.naccept = naccept;
  stats.nreject = nreject;
  debug!(
    nfev = stats.nfev,
    naccept, nreject, y_final = y, "integration finished"
  );

  Ok(Solution {
    request,
    segments,
    y_final: y,
    success: true,
    stats,
  })
}

/// Initial step size, following Hairer, Nørsett & Wanner (II.4).
fn initial_step<F>(
  rhs: &mut F,
  t0: f64,
  y0: f64,
  f0: f64,
  interval: f64,
  rtol: f64,
  atol: f64,
) -> Result<f64, SolveError>
where
  F: FnMut(f64, f64) -> Result<f64, SolveError>,
{
  let scale = atol + y0.abs() * rtol;
  let d0 = y0.abs() / scale;
  let d1 = f0.abs() / scale;
  let h0 = if d0 < 1e-5 || d1 < 1e-5 {
    1e-6
  } else {
    0.01 * d0 / d1
  };
  let h0 = h0.min(interval);

  let f1 = rhs(t0 + h0, y0 + h0 * f0)?;
  let d2 = (f1 - f0).abs() / scale / h0;

  let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
    (h0 * 1e-3).max(1e-6)
  } else {
    (0.01 / d1.max(d2)).powf(1.0 / (ERROR_ORDER + 1.0))
  };

  Ok((100.0 * h0).min(h1).min(interval))
}

/// Distance from `x` to the next representable `f64` away from zero.
fn spacing(x: f64) -> f64 {
  let x = x.abs();
  if x == 0.0 {
    return f64::from_bits(1);
  }
  if !x.is_finite() {
    return f64::INFINITY;
  }
  f64::from_bits(x.to_bits() + 1) - x
}
