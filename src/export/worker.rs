use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{export_file_name, render_html, ChartSnapshot, ExportConfig, ExportError};

/// Writes chart documents in the background, one at a time.
///
/// A request made while a job is still running is rejected with
/// [`ExportError::Busy`] instead of being queued.
#[derive(Debug, Clone)]
pub struct ExportWorker {
  config: ExportConfig,
  busy: Arc<AtomicBool>,
}

/// A submitted export job.
#[derive(Debug)]
pub struct ExportHandle {
  task: JoinHandle<Result<PathBuf, ExportError>>,
}

impl ExportHandle {
  /// Waits for the job and returns the path of the written document.
  pub async fn wait(self) -> Result<PathBuf, ExportError> {
    self.task.await?
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }
}

/// Holds the in-flight flag for as long as a job lives, panics included.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
  fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| BusyGuard(Arc::clone(flag)))
  }
}

impl Drop for BusyGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl ExportWorker {
  pub fn new(config: ExportConfig) -> Self {
    Self {
      config,
      busy: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn config(&self) -> &ExportConfig {
    &self.config
  }

  /// Whether a job is currently in flight.
  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  /// Starts writing `snapshot` as an HTML chart under the configured
  /// directory. Must be called from within a Tokio runtime.
  pub fn submit(
    &self,
    snapshot: ChartSnapshot,
  ) -> Result<ExportHandle, ExportError> {
    let guard = match BusyGuard::acquire(&self.busy) {
      Some(guard) => guard,
      None => {
        warn!("export requested while another export is running");
        return Err(ExportError::Busy);
      }
    };

    let config = self.config.clone();
    let task = tokio::spawn(async move {
      let _guard = guard;
      let path = config.dir.join(export_file_name());
      info!(path = %path.display(), points = snapshot.curve.len(), "export started");

      let document = render_html(&snapshot)?;
      write_atomically(&path, document.as_bytes()).await?;
      info!(path = %path.display(), "export finished");

      if config.open_viewer {
        open_in_viewer(&path);
      }
      Ok::<_, ExportError>(path)
    });

    Ok(ExportHandle { task })
  }
}

/// Writes to a hidden sibling file first and renames it into place, so
/// `path` only ever holds a complete document.
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  tokio::fs::create_dir_all(dir).await?;

  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let tmp = dir.join(format!(".{file_name}.tmp"));

  if let Err(e) = tokio::fs::write(&tmp, contents).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(e.into());
  }
  if let Err(e) = tokio::fs::rename(&tmp, path).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(e.into());
  }
  Ok(())
}

/// Hands the document to the platform's default viewer. Failures are only
/// logged; the document has been written either way.
fn open_in_viewer(path: &Path) {
  match launch_detached(viewer_command(path)) {
    Ok(_) => debug!(path = %path.display(), "viewer launched"),
    Err(e) => warn!(path = %path.display(), error = %e, "could not launch viewer"),
  }
}

fn viewer_command(path: &Path) -> Command {
  let mut command = if cfg!(target_os = "macos") {
    Command::new("open")
  } else if cfg!(target_os = "windows") {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", ""]);
    command
  } else {
    Command::new("xdg-open")
  };
  command.arg(path);
  command
}

/// Spawns `command` and reaps it on a background task so the launcher never
/// lingers as a zombie.
fn launch_detached(
  mut command: Command,
) -> io::Result<JoinHandle<Option<ExitStatus>>> {
  let mut child = command.spawn()?;
  Ok(tokio::spawn(async move {
    match child.wait().await {
      Ok(status) => {
        debug!(%status, "viewer launcher exited");
        Some(status)
      }
      Err(e) => {
        warn!(error = %e, "could not wait for viewer launcher");
        None
      }
    }
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sampler::Curve;
  use crate::solver::IntegrationRequest;

  fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("calcediff-worker-{}", uuid::Uuid::new_v4()))
  }

  fn snapshot() -> ChartSnapshot {
    ChartSnapshot {
      equation: "-y".to_string(),
      request: IntegrationRequest::new(0.0, 1.0, 1.0),
      curve: Curve {
        points: vec![(0.0, 1.0), (0.5, 0.6065306597), (1.0, 0.3678794412)],
      },
    }
  }

  #[tokio::test]
  async fn writes_a_complete_document() {
    let dir = scratch_dir();
    let worker = ExportWorker::new(ExportConfig {
      dir: dir.clone(),
      open_viewer: false,
    });

    let path = worker.submit(snapshot()).unwrap().wait().await.unwrap();
    assert!(path.starts_with(&dir));
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, render_html(&snapshot()).unwrap());

    let leftovers: Vec<_> = std::fs::read_dir(&dir)
      .unwrap()
      .filter_map(|e| e.ok())
      .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
      .collect();
    assert!(leftovers.is_empty());
    assert!(!worker.is_busy());

    std::fs::remove_dir_all(dir).unwrap();
  }

  #[tokio::test]
  async fn second_job_is_rejected_while_first_runs() {
    let dir = scratch_dir();
    let worker = ExportWorker::new(ExportConfig {
      dir: dir.clone(),
      open_viewer: false,
    });

    // The current-thread runtime does not poll the first job until we yield.
    let first = worker.submit(snapshot()).unwrap();
    assert!(worker.is_busy());
    assert!(matches!(worker.submit(snapshot()), Err(ExportError::Busy)));

    first.wait().await.unwrap();
    let again = worker.submit(snapshot()).unwrap();
    again.wait().await.unwrap();

    std::fs::remove_dir_all(dir).unwrap();
  }

  #[test]
  fn viewer_command_passes_the_document_path() {
    let path = Path::new("/tmp/solution.html");
    let command = viewer_command(path);
    let std_command = command.as_std();
    assert_eq!(std_command.get_args().last(), Some(path.as_os_str()));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn launched_process_is_reaped() {
    let waiter = launch_detached(Command::new("true")).unwrap();
    let status = waiter.await.unwrap().unwrap();
    assert!(status.success());
  }

  #[tokio::test]
  async fn missing_launcher_is_an_error() {
    let command = Command::new("calcediff-no-such-viewer");
    assert!(launch_detached(command).is_err());
  }
}
