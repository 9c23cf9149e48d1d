use calcediff::compiler::compile;
use calcediff::sampler::sample;
use calcediff::solver::{solve, IntegrationRequest, Solution, SolveError, SolverOptions};

fn solve_text(
  text: &str,
  t0: f64,
  y0: f64,
  tf: f64,
  options: &SolverOptions,
) -> Result<Solution, SolveError> {
  let eq = compile(text).unwrap();
  solve(|t, y| eq.eval(t, y), IntegrationRequest::new(t0, y0, tf), options)
}

fn tight() -> SolverOptions {
  SolverOptions::default().with_rtol(1e-10).with_atol(1e-12)
}

mod accuracy {
  use super::*;

  #[test]
  fn exponential_growth_reaches_e() {
    let solution = solve_text("y", 0.0, 1.0, 1.0, &tight()).unwrap();
    let e = std::f64::consts::E;
    assert!((solution.y_final() - e).abs() < 1e-8);
    assert_eq!(format!("{:.6}", solution.y_final()), "2.718282");
  }

  #[test]
  fn default_tolerances_are_close_to_e() {
    let solution =
      solve_text("y", 0.0, 1.0, 1.0, &SolverOptions::default()).unwrap();
    let e = std::f64::consts::E;
    assert!(((solution.y_final() - e) / e).abs() < 1e-4);
    assert!(solution.success());
  }

  #[test]
  fn linear_right_hand_side_is_exact() {
    let solution =
      solve_text("t", 0.0, 0.0, 2.0, &SolverOptions::default()).unwrap();
    for t in [0.0, 0.3, 0.77, 1.5, 2.0] {
      let y = solution.evaluate(t).unwrap();
      assert!((y - t * t / 2.0).abs() < 1e-10, "y({t}) = {y}");
    }
  }

  #[test]
  fn cosine_integrates_to_sine() {
    let solution =
      solve_text("cos(t)", 0.0, 0.0, 10.0, &SolverOptions::default()).unwrap();
    let curve = sample(&solution, 200);
    for (t, y) in curve.points {
      assert!((y - t.sin()).abs() < 1e-4, "y({t}) = {y}");
    }
  }

  #[test]
  fn dense_output_matches_between_steps() {
    let solution = solve_text("-2 * y", 0.0, 1.0, 3.0, &tight()).unwrap();
    let steps: Vec<f64> = solution.step_times().collect();
    assert!(steps.len() > 3);
    for w in steps.windows(2) {
      let mid = 0.5 * (w[0] + w[1]);
      let exact = (-2.0 * mid).exp();
      assert!((solution.evaluate(mid).unwrap() - exact).abs() < 1e-8);
    }
  }

  #[test]
  fn evaluate_outside_the_interval_is_none() {
    let solution =
      solve_text("y", 0.0, 1.0, 1.0, &SolverOptions::default()).unwrap();
    assert_eq!(solution.evaluate(-0.1), None);
    assert_eq!(solution.evaluate(1.1), None);
    assert_eq!(solution.evaluate(0.0), Some(1.0));
    assert_eq!(solution.evaluate(1.0), Some(solution.y_final()));
  }

  #[test]
  fn steps_start_at_t0_and_end_at_tf() {
    let solution =
      solve_text("sin(t) * y", 0.1, 1.0, 0.7, &SolverOptions::default()).unwrap();
    let steps: Vec<f64> = solution.step_times().collect();
    assert_eq!(steps.first(), Some(&0.1));
    assert_eq!(steps.last(), Some(&0.7));
    assert!(steps.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn intervals_near_the_float_spacing_still_solve() {
    // At 1e15 adjacent doubles are 0.125 apart, so the whole interval is
    // narrower than ten spacings.
    let (t0, tf) = (1e15, 1e15 + 1.0);
    let solution = solve_text("t", t0, 0.0, tf, &SolverOptions::default()).unwrap();
    assert!(solution.success());
    assert_eq!(solution.step_times().last(), Some(tf));

    let loose = SolverOptions::default().with_rtol(1e-3).with_atol(1e-3);
    let solution = solve_text("y", t0, 1.0, tf, &loose).unwrap();
    assert!((solution.y_final() - std::f64::consts::E).abs() < 1e-3);
  }
}

mod validation {
  use super::*;

  #[test]
  fn tf_must_exceed_t0() {
    for (t0, tf) in [(1.0, 1.0), (2.0, 1.0), (0.0, -5.0)] {
      let err = solve_text("y", t0, 1.0, tf, &SolverOptions::default()).unwrap_err();
      assert_eq!(err, SolveError::InvalidRange { t0, tf });
    }
  }

  #[test]
  fn non_finite_inputs_are_rejected() {
    let opts = SolverOptions::default();
    assert!(matches!(
      solve_text("y", f64::NAN, 1.0, 1.0, &opts),
      Err(SolveError::InvalidInput { name: "t0", .. })
    ));
    assert!(matches!(
      solve_text("y", 0.0, f64::INFINITY, 1.0, &opts),
      Err(SolveError::InvalidInput { name: "y0", .. })
    ));
    assert!(matches!(
      solve_text("y", 0.0, 1.0, f64::NEG_INFINITY, &opts),
      Err(SolveError::InvalidInput { name: "tf", .. })
    ));
  }

  #[test]
  fn invalid_range_never_calls_the_function() {
    let mut calls = 0;
    let result = solve(
      |_, y| {
        calls += 1;
        Ok(y)
      },
      IntegrationRequest::new(1.0, 0.0, 0.0),
      &SolverOptions::default(),
    );
    assert!(result.is_err());
    assert_eq!(calls, 0);
  }
}

mod failures {
  use super::*;

  #[test]
  fn log_of_negative_time_fails_to_evaluate() {
    let err =
      solve_text("log(t)", -1.0, 0.0, 1.0, &SolverOptions::default()).unwrap_err();
    match err {
      SolveError::EvaluationFailure { source } => {
        assert_eq!(source.operation, "log(-1)");
      }
      other => panic!("expected EvaluationFailure, got {other:?}"),
    }
  }

  #[test]
  fn reciprocal_across_zero_fails() {
    let result = solve_text("1/t", -1.0, 0.0, 1.0, &SolverOptions::default());
    assert!(result.is_err());
  }

  #[test]
  fn finite_time_blow_up_fails() {
    let result = solve_text("y^2", 0.0, 1.0, 2.0, &SolverOptions::default());
    assert!(result.is_err());
  }

  #[test]
  fn step_budget_is_enforced() {
    let opts = SolverOptions::default().with_max_steps(5);
    let err = solve_text("cos(t)", 0.0, 0.0, 1000.0, &opts).unwrap_err();
    assert!(matches!(err, SolveError::DivergedOrFailed { .. }));
    assert!(err.to_string().contains("maximum of 5 steps"));
  }

  #[test]
  fn error_messages_are_readable() {
    let err = solve_text("y", 2.0, 1.0, 1.0, &SolverOptions::default()).unwrap_err();
    assert_eq!(
      err.to_string(),
      "The final time (tf = 1) must be greater than the initial time (t0 = 2)"
    );
  }
}

mod sampling {
  use super::*;

  #[test]
  fn decay_samples_decrease_towards_zero() {
    let solution =
      solve_text("-y", 0.0, 1.0, 5.0, &SolverOptions::default()).unwrap();
    let curve = sample(&solution, 500);
    assert_eq!(curve.len(), 500);
    let ys: Vec<f64> = curve.ys().collect();
    assert!(ys.windows(2).all(|w| w[1] < w[0]));
    assert_eq!(ys[0], 1.0);
    assert!(ys[499] > 0.0 && ys[499] < 0.01);
  }

  #[test]
  fn sampling_is_idempotent() {
    let solution =
      solve_text("t - y", 0.0, 2.0, 3.0, &SolverOptions::default()).unwrap();
    let before = solution.clone();
    let a = sample(&solution, 500);
    let b = sample(&solution, 500);
    assert_eq!(a, b);
    assert_eq!(solution, before);
  }

  #[test]
  fn samples_span_the_interval() {
    let solution =
      solve_text("y", -1.5, 1.0, 2.5, &SolverOptions::default()).unwrap();
    let curve = sample(&solution, 17);
    let ts: Vec<f64> = curve.ts().collect();
    assert_eq!(ts.len(), 17);
    assert_eq!(ts[0], -1.5);
    assert_eq!(ts[16], 2.5);
    assert_eq!(curve.points[16].1, solution.y_final());
  }
}
