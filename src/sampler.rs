use serde::Serialize;

use crate::solver::Solution;

pub const DEFAULT_SAMPLES: usize = 500;

/// `(t, y)` points of a solution on a uniform grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Curve {
  pub points: Vec<(f64, f64)>,
}

impl Curve {
  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn ts(&self) -> impl Iterator<Item = f64> + '_ {
    self.points.iter().map(|&(t, _)| t)
  }

  pub fn ys(&self) -> impl Iterator<Item = f64> + '_ {
    self.points.iter().map(|&(_, y)| y)
  }

  /// Smallest and largest finite `y`, or `None` if there is none.
  pub fn y_bounds(&self) -> Option<(f64, f64)> {
    self.ys().filter(|y| y.is_finite()).fold(None, |acc, y| match acc {
      None => Some((y, y)),
      Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
    })
  }
}

/// `count` evenly spaced values from `start` to `end`, both included.
///
/// The last value is exactly `end`.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
  match count {
    0 => Vec::new(),
    1 => vec![start],
    _ => {
      let step = (end - start) / (count - 1) as f64;
      (0..count)
        .map(|i| {
          if i == count - 1 {
            end
          } else {
            start + i as f64 * step
          }
        })
        .collect()
    }
  }
}

/// Evaluates the dense solution on `count` evenly spaced points over
/// `[t0, tf]`.
pub fn sample(solution: &Solution, count: usize) -> Curve {
  let points = linspace(solution.t0(), solution.tf(), count)
    .into_iter()
    .map(|t| (t, solution.value_at(t)))
    .collect();
  Curve { points }
}
