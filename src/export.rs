//! Turning a sampled solution into something a person can look at: an SVG
//! image for in-process display and a self-contained HTML chart for an
//! external viewer.

pub mod html;
pub mod svg;
pub mod worker;

use std::path::PathBuf;

use thiserror::Error;

use crate::sampler::Curve;
use crate::solver::IntegrationRequest;

pub use html::render_html;
pub use svg::{render_svg, SvgOptions};
pub use worker::{ExportHandle, ExportWorker};

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("Render error: {0}")]
  Render(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("A chart export is already in progress")]
  Busy,
  #[error("Export task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Everything needed to draw the current solution, detached from the
/// session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSnapshot {
  /// Equation text exactly as the user typed it.
  pub equation: String,
  pub request: IntegrationRequest,
  pub curve: Curve,
}

/// Where exported documents go and what happens to them afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
  pub dir: PathBuf,
  /// Open the written document with the system viewer.
  pub open_viewer: bool,
}

impl Default for ExportConfig {
  fn default() -> Self {
    Self {
      dir: std::env::temp_dir().join("calcediff"),
      open_viewer: false,
    }
  }
}

/// `solution_<timestamp>_<id>.html`. The id keeps two exports within the same
/// second apart.
pub fn export_file_name() -> String {
  let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
  let id = uuid::Uuid::new_v4().simple().to_string();
  format!("solution_{timestamp}_{}.html", &id[..8])
}

/// Escapes text for use in HTML/SVG markup and attribute values.
pub(crate) fn html_escape(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&#39;")
}
