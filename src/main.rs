use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use calcediff::export::{render_svg, ExportConfig, ExportHandle, ExportWorker, SvgOptions};
use calcediff::sampler::DEFAULT_SAMPLES;
use calcediff::session::{Session, SessionConfig, SolveInput};
use calcediff::solver::{SolverOptions, DEFAULT_ATOL, DEFAULT_MAX_STEPS, DEFAULT_RTOL};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(flatten)]
  settings: Settings,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct Settings {
  /// Relative tolerance of the integrator
  #[arg(long, global = true, env = "CALCEDIFF_RTOL", default_value_t = DEFAULT_RTOL, value_parser = positive_float)]
  rtol: f64,

  /// Absolute tolerance of the integrator
  #[arg(long, global = true, env = "CALCEDIFF_ATOL", default_value_t = DEFAULT_ATOL, value_parser = positive_float)]
  atol: f64,

  /// Give up after this many integration steps
  #[arg(long, global = true, default_value_t = DEFAULT_MAX_STEPS)]
  max_steps: usize,

  /// Number of points in an exported curve
  #[arg(long, global = true, env = "CALCEDIFF_SAMPLES", default_value_t = DEFAULT_SAMPLES)]
  samples: usize,

  /// Directory for HTML charts
  #[arg(long, global = true, env = "CALCEDIFF_EXPORT_DIR")]
  export_dir: Option<PathBuf>,

  /// Open HTML charts in the system viewer
  #[arg(long, global = true)]
  open: bool,
}

impl Settings {
  fn session_config(&self) -> SessionConfig {
    SessionConfig {
      solver: SolverOptions::default()
        .with_rtol(self.rtol)
        .with_atol(self.atol)
        .with_max_steps(self.max_steps),
      samples: self.samples,
    }
  }

  fn export_config(&self) -> ExportConfig {
    let mut config = ExportConfig::default();
    if let Some(dir) = &self.export_dir {
      config.dir = dir.clone();
    }
    config.open_viewer = self.open;
    config
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Solve y' = EQUATION from t0 to tf and print y(tf)
  Solve {
    /// Right-hand side f(t, y), e.g. "t**2 - sin(y)"
    equation: String,
    #[arg(long, allow_hyphen_values = true)]
    t0: String,
    #[arg(long, allow_hyphen_values = true)]
    y0: String,
    #[arg(long, allow_hyphen_values = true)]
    tf: String,
    /// Write the curve as an SVG image
    #[arg(long)]
    svg: Option<PathBuf>,
    /// Write the curve as an HTML chart
    #[arg(long)]
    html: bool,
    /// Print the sampled curve as CSV
    #[arg(long)]
    points: bool,
  },
  /// Interactive prompt
  Repl,
}

fn positive_float(s: &str) -> Result<f64, String> {
  match s.trim().parse::<f64>() {
    Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
    Ok(_) => Err(format!("{s} is not a positive number")),
    Err(e) => Err(e.to_string()),
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let result = match cli.command {
    Commands::Solve {
      equation,
      t0,
      y0,
      tf,
      svg,
      html,
      points,
    } => run_solve(
      &cli.settings,
      SolveInput::new(equation, t0, y0, tf),
      svg,
      html,
      points,
    ),
    Commands::Repl => run_repl(&cli.settings),
  };

  if let Err(e) = result {
    eprintln!("Error: {e:#}");
    std::process::exit(1);
  }
}

fn run_solve(
  settings: &Settings,
  input: SolveInput,
  svg: Option<PathBuf>,
  html: bool,
  points: bool,
) -> anyhow::Result<()> {
  let mut session = Session::new(settings.session_config());
  let summary = session.solve_and_store(&input)?;
  println!("{summary}");

  if !points && svg.is_none() && !html {
    return Ok(());
  }
  let snapshot = session.export_current()?;

  if points {
    println!("t,y");
    for (t, y) in &snapshot.curve.points {
      println!("{t},{y}");
    }
  }

  if let Some(path) = svg {
    let document = render_svg(&snapshot, &SvgOptions::default())?;
    std::fs::write(&path, document)
      .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
  }

  if html {
    let runtime = tokio::runtime::Runtime::new()?;
    let worker = ExportWorker::new(settings.export_config());
    let path = runtime.block_on(async { worker.submit(snapshot)?.wait().await })?;
    println!("Wrote {}", path.display());
  }
  Ok(())
}

const REPL_HELP: &str = "\
Commands:
  solve <equation> ; <t0> ; <y0> ; <tf>   solve and remember the result
  graph                                   write an HTML chart in the background
  svg <path>                              write the current curve as SVG
  clear                                   forget the current solution
  help                                    show this text
  quit                                    leave";

fn run_repl(settings: &Settings) -> anyhow::Result<()> {
  let runtime = tokio::runtime::Runtime::new()?;
  let worker = ExportWorker::new(settings.export_config());
  let mut session = Session::new(settings.session_config());
  let mut pending: Option<ExportHandle> = None;

  println!("y' = f(t, y). Type `help` for commands.");
  let stdin = io::stdin();
  let mut lines = stdin.lock().lines();
  loop {
    report_finished_export(&runtime, &mut pending);
    print!("> ");
    io::stdout().flush()?;

    let Some(line) = lines.next() else { break };
    let line = line?;
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

    match command {
      "" => {}
      "quit" | "exit" => break,
      "help" => println!("{REPL_HELP}"),
      "solve" => {
        let mut fields = rest.split(';').map(str::trim);
        let mut next = || fields.next().unwrap_or_default().to_string();
        let input = SolveInput {
          equation: next(),
          t0: next(),
          y0: next(),
          tf: next(),
        };
        match session.solve_and_store(&input) {
          Ok(summary) => println!("{summary}"),
          Err(e) => println!("Error: {e}"),
        }
      }
      "graph" => match session.export_current() {
        Ok(snapshot) => match runtime.block_on(async { worker.submit(snapshot) }) {
          Ok(handle) => {
            if let Some(report) = replace_pending(&runtime, &mut pending, handle) {
              println!("{report}");
            }
            println!("Exporting chart...");
          }
          Err(e) => println!("Error: {e}"),
        },
        Err(e) => println!("Error: {e}"),
      },
      "svg" => {
        if rest.trim().is_empty() {
          println!("Error: svg needs a file path");
          continue;
        }
        let path = PathBuf::from(rest.trim());
        let written = session
          .export_current()
          .map_err(anyhow::Error::from)
          .and_then(|snapshot| Ok(render_svg(&snapshot, &SvgOptions::default())?))
          .and_then(|document| {
            std::fs::write(&path, document)
              .with_context(|| format!("writing {}", path.display()))
          });
        match written {
          Ok(()) => println!("Wrote {}", path.display()),
          Err(e) => println!("Error: {e:#}"),
        }
      }
      "clear" => {
        session.clear();
        println!("Cleared.");
      }
      other => println!("Unknown command {other:?}. Type `help` for commands."),
    }
  }

  // Let a running export finish before the runtime goes away.
  if let Some(handle) = pending.take() {
    println!("{}", export_outcome(&runtime, handle));
  }
  Ok(())
}

fn report_finished_export(
  runtime: &tokio::runtime::Runtime,
  pending: &mut Option<ExportHandle>,
) {
  if !pending.as_ref().is_some_and(ExportHandle::is_finished) {
    return;
  }
  if let Some(handle) = pending.take() {
    println!("{}", export_outcome(runtime, handle));
  }
}

/// Tracks `handle` as the pending export and returns the report of the one it
/// replaces, if any.
fn replace_pending(
  runtime: &tokio::runtime::Runtime,
  pending: &mut Option<ExportHandle>,
  handle: ExportHandle,
) -> Option<String> {
  pending
    .replace(handle)
    .map(|previous| export_outcome(runtime, previous))
}

fn export_outcome(runtime: &tokio::runtime::Runtime, handle: ExportHandle) -> String {
  match runtime.block_on(handle.wait()) {
    Ok(path) => format!("Chart written to {}", path.display()),
    Err(e) => format!("Error: {e}"),
  }
}
