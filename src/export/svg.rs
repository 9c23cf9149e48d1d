use plotters::prelude::*;

use super::{html_escape, ChartSnapshot, ExportError};

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 400;
/// Internal rendering resolution multiplier for sub-pixel precision.
/// Plotters maps to integer coordinates, so we render at a higher resolution
/// and scale down via SVG viewBox to get smooth curves.
const RESOLUTION_SCALE: u32 = 10;

/// Royal blue, the curve colour of the HTML chart as well.
const CURVE_COLOR: RGBColor = RGBColor(0x41, 0x69, 0xE1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvgOptions {
  pub width: u32,
  pub height: u32,
  /// Emit `width="100%"` so the image fills its container.
  pub full_width: bool,
}

impl Default for SvgOptions {
  fn default() -> Self {
    Self {
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
      full_width: false,
    }
  }
}

fn render_err(e: impl std::fmt::Display) -> ExportError {
  ExportError::Render(format!("Plot: {e}"))
}

/// Draws the curve as an SVG line plot titled `Solution of y' = <equation>`.
pub fn render_svg(
  snapshot: &ChartSnapshot,
  opts: &SvgOptions,
) -> Result<String, ExportError> {
  let x_range = (snapshot.request.t0, snapshot.request.tf);
  let y_range = padded_range(snapshot.curve.y_bounds().unwrap_or((0.0, 0.0)));
  let (x_min, x_max) = x_range;
  let (y_min, y_max) = y_range;

  let render_width = opts.width * RESOLUTION_SCALE;
  let render_height = opts.height * RESOLUTION_SCALE;
  let sf = RESOLUTION_SCALE as f64;
  let s = RESOLUTION_SCALE as i32;

  let top_margin = 25 * RESOLUTION_SCALE;
  let x_label_area = 25 * RESOLUTION_SCALE + 16 * RESOLUTION_SCALE;
  let y_label_area = 45 * RESOLUTION_SCALE + 18 * RESOLUTION_SCALE;
  let side_margin = 10 * RESOLUTION_SCALE;

  let mut buf = String::new();
  {
    let root = SVGBackend::with_string(&mut buf, (render_width, render_height))
      .into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let tick = 4 * s;
    let dark_gray = RGBColor(0x66, 0x66, 0x66);
    let light_gray = RGBColor(0xCC, 0xCC, 0xCC);

    let mut chart = ChartBuilder::on(&root)
      .margin_top(top_margin)
      .margin_right(side_margin)
      .margin_bottom(side_margin)
      .margin_left(side_margin)
      .x_label_area_size(x_label_area)
      .y_label_area_size(y_label_area)
      .build_cartesian_2d(x_min..x_max, y_min..y_max)
      .map_err(render_err)?;

    let x_major = nice_step(x_max - x_min, 5);
    let y_major = nice_step(y_max - y_min, 5);
    let x_tick_count = ((x_max - x_min) / x_major).round() as usize + 1;
    let y_tick_count = ((y_max - y_min) / y_major).round() as usize + 1;

    chart
      .configure_mesh()
      .disable_mesh()
      .x_labels(x_tick_count)
      .y_labels(y_tick_count)
      .x_label_formatter(&move |v: &f64| format_tick(*v, x_major))
      .y_label_formatter(&move |v: &f64| format_tick(*v, y_major))
      .axis_style(dark_gray.stroke_width(RESOLUTION_SCALE))
      .label_style(("sans-serif", sf * 11.0).into_font().color(&dark_gray))
      .set_tick_mark_size(LabelAreaPosition::Left, tick)
      .set_tick_mark_size(LabelAreaPosition::Bottom, tick)
      .draw()
      .map_err(render_err)?;

    // Lighter origin line through y = 0 if visible
    if y_min < 0.0 && y_max > 0.0 {
      chart
        .draw_series(std::iter::once(PathElement::new(
          vec![(x_min, 0.0), (x_max, 0.0)],
          light_gray.stroke_width(RESOLUTION_SCALE),
        )))
        .map_err(render_err)?;
    }

    for run in finite_runs(&snapshot.curve.points) {
      chart
        .draw_series(std::iter::once(PathElement::new(
          run.to_vec(),
          CURVE_COLOR.stroke_width(2 * RESOLUTION_SCALE),
        )))
        .map_err(render_err)?;
    }

    root.present().map_err(render_err)?;
  }

  rewrite_svg_header(&mut buf, opts, render_width, render_height);

  // Title and axis labels are injected as plain SVG text so the equation is
  // escaped exactly once, by us.
  if let Some(insert_pos) = buf.rfind("</svg>") {
    let plot_x0 = (side_margin + y_label_area) as f64;
    let plot_w = render_width as f64 - 2.0 * side_margin as f64 - y_label_area as f64;
    let plot_h = render_height as f64
      - top_margin as f64
      - side_margin as f64
      - x_label_area as f64;
    let font_size = sf * 12.0;
    let title_font_size = sf * 14.0;
    let cx = plot_x0 + plot_w / 2.0;
    let cy = top_margin as f64 + plot_h / 2.0;
    let title_y = top_margin as f64 - title_font_size * 0.6;
    let x_label_y = render_height as f64 - side_margin as f64 - font_size * 0.2;
    let y_label_x = side_margin as f64 + font_size;

    let labels = format!(
      "<text x=\"{cx:.1}\" y=\"{title_y:.1}\" text-anchor=\"middle\" \
       font-family=\"sans-serif\" font-size=\"{title_font_size:.0}\" \
       fill=\"#333\">Solution of y' = {title}</text>\n\
       <text x=\"{cx:.1}\" y=\"{x_label_y:.1}\" text-anchor=\"middle\" \
       font-family=\"sans-serif\" font-size=\"{font_size:.0}\" \
       fill=\"#666\">t</text>\n\
       <text x=\"{y_label_x:.1}\" y=\"{cy:.1}\" text-anchor=\"middle\" \
       font-family=\"sans-serif\" font-size=\"{font_size:.0}\" \
       fill=\"#666\" transform=\"rotate(-90,{y_label_x:.1},{cy:.1})\">y</text>\n",
      title = html_escape(&snapshot.equation),
    );
    buf.insert_str(insert_pos, &labels);
  }

  Ok(buf)
}

/// Widens a `(min, max)` range by 5% on each side, or by 1 when it is flat.
fn padded_range((lo, hi): (f64, f64)) -> (f64, f64) {
  let span = hi - lo;
  if span.abs() < f64::EPSILON * lo.abs().max(1.0) {
    (lo - 1.0, hi + 1.0)
  } else {
    (lo - 0.05 * span, hi + 0.05 * span)
  }
}

/// Runs of consecutive finite points long enough to draw as a line.
fn finite_runs(points: &[(f64, f64)]) -> impl Iterator<Item = &[(f64, f64)]> {
  points
    .split(|(_, y)| !y.is_finite())
    .filter(|run| run.len() > 1)
}

/// Tick spacing of 1, 2 or 5 times a power of ten giving about
/// `target_labels` ticks over `range`.
fn nice_step(range: f64, target_labels: usize) -> f64 {
  let raw = range / target_labels as f64;
  let magnitude = 10_f64.powf(raw.abs().log10().floor());
  let mantissa = [1.0, 2.0, 5.0]
    .into_iter()
    .find(|&m| raw / magnitude <= m)
    .unwrap_or(10.0);
  mantissa * magnitude
}

/// Format a tick value with as many decimals as the tick step needs.
fn format_tick(v: f64, step: f64) -> String {
  let decimals = (-step.log10().floor()).max(0.0) as usize;
  let s = format!("{v:.decimals$}");
  // Avoid "-0" labels.
  if s.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
    s.trim_start_matches('-').to_string()
  } else {
    s
  }
}

/// Replaces the backend's `<svg ...` opening tag so the high resolution
/// drawing is shown at the requested size.
fn rewrite_svg_header(
  buf: &mut String,
  opts: &SvgOptions,
  render_width: u32,
  render_height: u32,
) {
  let Some(end) = buf.find('>') else { return };
  let size = if opts.full_width {
    "width=\"100%\"".to_string()
  } else {
    format!("width=\"{}\" height=\"{}\"", opts.width, opts.height)
  };
  let header = format!(
    "<svg {size} viewBox=\"0 0 {render_width} {render_height}\" \
     preserveAspectRatio=\"xMidYMid meet\" xmlns=\"http://www.w3.org/2000/svg\""
  );
  buf.replace_range(..end, &header);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nice_steps() {
    assert_eq!(nice_step(10.0, 5), 2.0);
    assert_eq!(nice_step(1.0, 5), 0.2);
    assert!((nice_step(0.03, 5) - 0.01).abs() < 1e-15);
  }

  #[test]
  fn tick_labels_follow_step() {
    assert_eq!(format_tick(2.0, 1.0), "2");
    assert_eq!(format_tick(0.4, 0.2), "0.4");
    assert_eq!(format_tick(-0.0001, 0.2), "0.0");
  }

  #[test]
  fn flat_ranges_are_widened() {
    assert_eq!(padded_range((3.0, 3.0)), (2.0, 4.0));
    let (lo, hi) = padded_range((0.0, 10.0));
    assert!((lo + 0.5).abs() < 1e-12 && (hi - 10.5).abs() < 1e-12);
  }

  #[test]
  fn runs_break_on_non_finite_values() {
    let points = [
      (0.0, 1.0),
      (1.0, 2.0),
      (2.0, f64::NAN),
      (3.0, 1.0),
      (4.0, f64::INFINITY),
      (5.0, 0.0),
      (6.0, 1.0),
    ];
    let runs: Vec<_> = finite_runs(&points).collect();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1], &[(5.0, 0.0), (6.0, 1.0)][..]);
  }
}
