use calcediff::export::html::extract_chart_json;
use calcediff::export::{
  render_html, render_svg, ChartSnapshot, ExportConfig, ExportError, ExportWorker,
  SvgOptions,
};
use calcediff::session::{Session, SolveInput};

fn solved_snapshot(equation: &str) -> ChartSnapshot {
  let mut session = Session::default();
  session
    .solve_and_store(&SolveInput::new(equation, "0", "1", "2"))
    .unwrap();
  session.export_current().unwrap()
}

mod html_export {
  use super::*;

  #[test]
  fn payload_reproduces_the_curve() {
    let snapshot = solved_snapshot("t - y");
    let doc = render_html(&snapshot).unwrap();
    let json = extract_chart_json(&doc).unwrap();

    assert_eq!(json["equation"].as_str(), Some("t - y"));
    let points = json["points"].as_array().unwrap();
    assert_eq!(points.len(), snapshot.curve.len());
    for (point, &(t, y)) in points.iter().zip(&snapshot.curve.points) {
      assert_eq!(point["x"].as_f64(), Some(t));
      assert_eq!(point["y"].as_f64(), Some(y));
    }
  }

  #[test]
  fn equation_cannot_break_the_page() {
    let mut snapshot = solved_snapshot("y");
    snapshot.equation = r#"y" onload="alert(1)</script><b>'"#.to_string();
    let doc = render_html(&snapshot).unwrap();

    assert_eq!(doc.matches("</script>").count(), 3);
    assert!(!doc.contains("<b>"));
    assert!(!doc.contains(r#"" onload=""#));
    assert!(doc.contains("y&quot; onload=&quot;alert(1)&lt;/script&gt;&lt;b&gt;&#39;"));

    let json = extract_chart_json(&doc).unwrap();
    assert_eq!(json["equation"].as_str(), Some(snapshot.equation.as_str()));
  }
}

mod svg_export {
  use super::*;

  #[test]
  fn renders_an_svg_document_with_a_title() {
    let snapshot = solved_snapshot("t^2 - sin(y)");
    let svg = render_svg(&snapshot, &SvgOptions::default()).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.trim_end().ends_with("</svg>"));
    assert!(svg.contains(r#"width="640" height="400""#));
    assert!(svg.contains("Solution of y' = t^2 - sin(y)"));
    assert!(svg.contains("<path") || svg.contains("<polyline"));
  }

  #[test]
  fn title_is_escaped() {
    let mut snapshot = solved_snapshot("y");
    snapshot.equation = "y < 1 & y > 0".to_string();
    let svg = render_svg(&snapshot, &SvgOptions::default()).unwrap();
    assert!(svg.contains("y &lt; 1 &amp; y &gt; 0"));
    assert!(!svg.contains("y < 1"));
  }

  #[test]
  fn full_width_drops_fixed_size() {
    let snapshot = solved_snapshot("-y");
    let opts = SvgOptions {
      full_width: true,
      ..SvgOptions::default()
    };
    let svg = render_svg(&snapshot, &opts).unwrap();
    assert!(svg.starts_with(r#"<svg width="100%""#));
    assert!(!svg.contains(r#"height="400""#));
  }

  #[test]
  fn flat_curves_still_render() {
    let snapshot = solved_snapshot("0");
    assert!(render_svg(&snapshot, &SvgOptions::default()).is_ok());
  }
}

mod background_export {
  use super::*;

  fn worker() -> (ExportWorker, std::path::PathBuf) {
    let dir = std::env::temp_dir()
      .join(format!("calcediff-export-{}", uuid::Uuid::new_v4()));
    let worker = ExportWorker::new(ExportConfig {
      dir: dir.clone(),
      open_viewer: false,
    });
    (worker, dir)
  }

  #[tokio::test]
  async fn writes_the_chart_into_the_export_dir() {
    let (worker, dir) = worker();
    let snapshot = solved_snapshot("cos(t)");

    let path = worker.submit(snapshot.clone()).unwrap().wait().await.unwrap();
    assert_eq!(path.parent(), Some(dir.as_path()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("solution_") && name.ends_with(".html"));

    let doc = std::fs::read_to_string(&path).unwrap();
    assert_eq!(doc, render_html(&snapshot).unwrap());

    std::fs::remove_dir_all(dir).unwrap();
  }

  #[tokio::test]
  async fn only_one_export_runs_at_a_time() {
    let (worker, dir) = worker();
    let snapshot = solved_snapshot("y");

    let first = worker.submit(snapshot.clone()).unwrap();
    let second = worker.submit(snapshot.clone());
    assert!(matches!(second, Err(ExportError::Busy)));
    assert_eq!(
      second.unwrap_err().to_string(),
      "A chart export is already in progress"
    );

    let written = first.wait().await.unwrap();
    assert!(written.exists());
    assert!(!worker.is_busy());
    assert!(worker.submit(snapshot).unwrap().wait().await.is_ok());

    std::fs::remove_dir_all(dir).unwrap();
  }
}
