use pest_derive::Parser;

pub mod compiler;
pub mod export;
pub mod sampler;
pub mod session;
pub mod solver;
pub mod syntax;

pub use compiler::{compile, Equation, EvalError, ParseError};
pub use export::{
  render_html, render_svg, ChartSnapshot, ExportConfig, ExportError,
  ExportHandle, ExportWorker, SvgOptions,
};
pub use sampler::{linspace, sample, Curve};
pub use session::{
  Session, SessionConfig, SessionError, SolveInput, Solved, SummaryValue,
};
pub use solver::{
  solve, IntegrationRequest, Solution, SolveError, SolverOptions, SolverStats,
};

#[derive(Parser)]
#[grammar = "equation.pest"]
pub struct EquationParser;

/// Runs the grammar over already normalized text (`**` for powers).
///
/// This is the raw parse tree; use [`compile`] to get something evaluable.
pub fn parse(
  input: &str,
) -> Result<pest::iterators::Pairs<'_, Rule>, Box<pest::error::Error<Rule>>> {
  use pest::Parser;
  EquationParser::parse(Rule::Equation, input).map_err(Box::new)
}

/// Compiles `equation` and integrates it in one go, with default options.
///
/// ```
/// use calcediff::{solve_text, IntegrationRequest};
///
/// let solution = solve_text("y", IntegrationRequest::new(0.0, 1.0, 1.0)).unwrap();
/// assert!((solution.y_final() - std::f64::consts::E).abs() < 1e-3);
/// ```
pub fn solve_text(
  equation: &str,
  request: IntegrationRequest,
) -> Result<Solution, SessionError> {
  let equation = compile(equation)?;
  Ok(solve(
    |t, y| equation.eval(t, y),
    request,
    &SolverOptions::default(),
  )?)
}
