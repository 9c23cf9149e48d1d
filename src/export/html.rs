use serde::Serialize;

use super::{html_escape, ChartSnapshot, ExportError};

#[derive(Serialize)]
struct ChartPoint {
  x: f64,
  y: f64,
}

#[derive(Serialize)]
struct ChartData<'a> {
  equation: &'a str,
  points: Vec<ChartPoint>,
}

/// Renders a standalone HTML page with a Chart.js line chart of the curve.
///
/// The points and the equation travel as one JSON document inside a
/// `<script type="application/json">` block. Every `<` in that JSON is written
/// as `\u003c`, so no equation text can close the block early; the visible copy
/// of the equation is HTML-escaped.
pub fn render_html(snapshot: &ChartSnapshot) -> Result<String, ExportError> {
  let data = ChartData {
    equation: &snapshot.equation,
    points: snapshot
      .curve
      .points
      .iter()
      .map(|&(x, y)| ChartPoint { x, y })
      .collect(),
  };
  let json = serde_json::to_string(&data)
    .map_err(|e| ExportError::Render(format!("chart data: {e}")))?
    .replace('<', "\\u003c");
  let equation = html_escape(&snapshot.equation);

  Ok(format!(
    r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>y' = {equation}</title>
  <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
  <style>
    body {{ font-family: Arial, sans-serif; margin: 20px; }}
    .container {{ max-width: 800px; margin: 0 auto; }}
    h2 {{ color: #2c3e50; }}
    .equation {{ font-style: italic; margin-bottom: 20px; }}
  </style>
</head>
<body>
  <div class="container">
    <h2>Solution of the differential equation</h2>
    <div class="equation">y' = {equation}</div>
    <canvas id="solutionChart" width="800" height="400"></canvas>
  </div>
  <script type="application/json" id="chartData">{json}</script>
  <script>
    const data = JSON.parse(document.getElementById('chartData').textContent);
    new Chart(document.getElementById('solutionChart').getContext('2d'), {{
      type: 'line',
      data: {{
        datasets: [{{
          label: 'y(t)',
          data: data.points,
          borderColor: 'rgba(65, 105, 225, 1)',
          backgroundColor: 'rgba(65, 105, 225, 0.1)',
          borderWidth: 2,
          tension: 0.3,
          pointRadius: 0
        }}]
      }},
      options: {{
        responsive: true,
        parsing: false,
        plugins: {{
          title: {{ display: true, text: "y' = " + data.equation }},
          tooltip: {{ mode: 'index', intersect: false }}
        }},
        scales: {{
          x: {{ type: 'linear', title: {{ display: true, text: 't' }} }},
          y: {{ title: {{ display: true, text: 'y(t)' }} }}
        }}
      }}
    }});
  </script>
</body>
</html>
"#
  ))
}

/// Pulls the embedded chart JSON back out of a rendered page.
pub fn extract_chart_json(document: &str) -> Option<serde_json::Value> {
  let open = r#"<script type="application/json" id="chartData">"#;
  let start = document.find(open)? + open.len();
  let end = start + document[start..].find("</script>")?;
  serde_json::from_str(&document[start..end]).ok()
}
