//! The orchestrating layer: turns the four text fields a user fills in into a
//! stored solution, and hands snapshots of it to the renderers.
//!
//! A [`Session`] is either empty or holds the last successful solve. A failed
//! solve never touches what is stored.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::compiler::{compile, Equation, ParseError};
use crate::export::ChartSnapshot;
use crate::sampler::{sample, DEFAULT_SAMPLES};
use crate::solver::{solve, IntegrationRequest, Solution, SolveError, SolverOptions};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
  #[error("Missing value for {field}")]
  MissingField { field: &'static str },
  #[error("{field} must be a number, got {value:?}")]
  NotANumber { field: &'static str, value: String },
  #[error("Nothing has been solved yet")]
  NoSolution,
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Solve(#[from] SolveError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
  pub solver: SolverOptions,
  /// Number of points in an exported curve.
  pub samples: usize,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      solver: SolverOptions::default(),
      samples: DEFAULT_SAMPLES,
    }
  }
}

/// The raw form fields, as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveInput {
  pub equation: String,
  pub t0: String,
  pub y0: String,
  pub tf: String,
}

impl SolveInput {
  pub fn new(
    equation: impl Into<String>,
    t0: impl Into<String>,
    y0: impl Into<String>,
    tf: impl Into<String>,
  ) -> Self {
    Self {
      equation: equation.into(),
      t0: t0.into(),
      y0: y0.into(),
      tf: tf.into(),
    }
  }

  /// Checks that every field is filled in and reads the three numbers.
  pub fn request(&self) -> Result<IntegrationRequest, SessionError> {
    let fields = [
      ("equation", self.equation.as_str()),
      ("t0", self.t0.as_str()),
      ("y0", self.y0.as_str()),
      ("tf", self.tf.as_str()),
    ];
    if let Some(&(field, _)) = fields.iter().find(|(_, v)| v.trim().is_empty()) {
      return Err(SessionError::MissingField { field });
    }

    Ok(IntegrationRequest::new(
      parse_number("t0", &self.t0)?,
      parse_number("y0", &self.y0)?,
      parse_number("tf", &self.tf)?,
    ))
  }
}

fn parse_number(field: &'static str, text: &str) -> Result<f64, SessionError> {
  text
    .trim()
    .parse::<f64>()
    .map_err(|_| SessionError::NotANumber {
      field,
      value: text.to_string(),
    })
}

/// `y(tf)` of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryValue {
  pub tf: f64,
  pub final_value: f64,
  /// `final_value` with six decimals.
  pub formatted: String,
}

impl SummaryValue {
  pub fn new(tf: f64, final_value: f64) -> Self {
    Self {
      tf,
      final_value,
      formatted: format!("{final_value:.6}"),
    }
  }
}

impl fmt::Display for SummaryValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "y({}) ≈ {}", self.tf, self.formatted)
  }
}

/// A stored successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Solved {
  pub equation: Equation,
  pub solution: Solution,
}

impl Solved {
  pub fn request(&self) -> IntegrationRequest {
    self.solution.request()
  }

  pub fn summary(&self) -> SummaryValue {
    SummaryValue::new(self.solution.tf(), self.solution.y_final())
  }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
  config: SessionConfig,
  current: Option<Solved>,
}

impl Session {
  pub fn new(config: SessionConfig) -> Self {
    Self {
      config,
      current: None,
    }
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn current(&self) -> Option<&Solved> {
    self.current.as_ref()
  }

  pub fn is_solved(&self) -> bool {
    self.current.is_some()
  }

  /// Reads the fields, compiles the equation and integrates it. The stored
  /// solution is replaced only if all of that succeeds.
  pub fn solve_and_store(
    &mut self,
    input: &SolveInput,
  ) -> Result<SummaryValue, SessionError> {
    let result = input
      .request()
      .and_then(|request| self.solve_equation(&input.equation, request));
    if let Err(e) = &result {
      debug!(equation = %input.equation, error = %e, "solve failed, keeping previous state");
    }
    result
  }

  /// Same as [`Session::solve_and_store`] for callers that already hold
  /// numbers.
  pub fn solve_equation(
    &mut self,
    equation: &str,
    request: IntegrationRequest,
  ) -> Result<SummaryValue, SessionError> {
    let equation = compile(equation)?;
    let solution = solve(
      |t, y| equation.eval(t, y),
      request,
      &self.config.solver,
    )?;

    let solved = Solved { equation, solution };
    let summary = solved.summary();
    info!(
      equation = %solved.equation,
      t0 = request.t0,
      tf = request.tf,
      y_final = summary.final_value,
      replaced = self.current.is_some(),
      "solution stored"
    );
    self.current = Some(solved);
    Ok(summary)
  }

  pub fn clear(&mut self) {
    if self.current.take().is_some() {
      info!("solution cleared");
    }
  }

  /// Samples the stored solution into an owned snapshot.
  pub fn export_current(&self) -> Result<ChartSnapshot, SessionError> {
    let solved = self.current.as_ref().ok_or(SessionError::NoSolution)?;
    Ok(ChartSnapshot {
      equation: solved.equation.source().to_string(),
      request: solved.request(),
      curve: sample(&solved.solution, self.config.samples),
    })
  }
}
