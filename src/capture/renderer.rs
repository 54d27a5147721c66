use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use itertools::Itertools;
use tracing::{debug, warn};

use crate::dataset::class_table::WidgetKind;
use crate::dataset::common_structs::Sample;
use crate::error::{DatasetError, DatasetResult, ProcessFailure};

pub const IMAGE_EXTENSION: &str = "jpg";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One screen to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Working directory of the renderer; outputs land here.
    pub output_folder: PathBuf,
    /// File name without extension, e.g. `ui_button-label_3`.
    pub base_name: String,
    pub width: u32,
    pub height: u32,
    pub widget_count: u32,
    pub widgets: Vec<WidgetKind>,
    pub delay_count: u32,
    pub layout: Option<String>,
}

impl RenderRequest {
    /// The renderer resolves `-o /<file>` against its working directory.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-w".to_string(),
            self.width.to_string(),
            "-h".to_string(),
            self.height.to_string(),
            "-c".to_string(),
            self.widget_count.to_string(),
            "-t".to_string(),
            self.widgets.iter().map(|w| w.name()).join(","),
            "-o".to_string(),
            format!("/{}.{}", self.base_name, IMAGE_EXTENSION),
            "-d".to_string(),
            self.delay_count.to_string(),
            "-l".to_string(),
            self.layout.clone().unwrap_or_else(|| "none".to_string()),
        ]
    }

    /// Where the image and its annotation are expected after a render.
    pub fn expected_sample(&self) -> Sample {
        Sample::from_image(
            self.output_folder
                .join(format!("{}.{}", self.base_name, IMAGE_EXTENSION)),
        )
    }
}

/// Produces one image and its annotation file per request.
pub trait Renderer {
    fn render(&mut self, request: &RenderRequest) -> DatasetResult<Sample>;
}

/// Runs the external UI generator binary, one blocking process per request.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    program: PathBuf,
    timeout: Duration,
}

impl ProcessRenderer {
    pub fn new<P: Into<PathBuf>>(program: P, timeout: Duration) -> ProcessRenderer {
        ProcessRenderer {
            program: program.into(),
            timeout,
        }
    }

    fn failure(&self, request: &RenderRequest, failure: ProcessFailure) -> DatasetError {
        DatasetError::ExternalProcess {
            program: self.program.clone(),
            sample: request.base_name.clone(),
            failure,
        }
    }
}

impl Renderer for ProcessRenderer {
    fn render(&mut self, request: &RenderRequest) -> DatasetResult<Sample> {
        // leftovers of an earlier run must not pass for this run's output
        let expected = request.expected_sample();
        for stale in [expected.image(), expected.label()] {
            if stale.exists() {
                warn!("removing stale renderer output {}", stale.display());
                fs::remove_file(stale).map_err(DatasetError::io_at(stale))?;
            }
        }

        debug!(
            "{} {}",
            self.program.display(),
            request.args().iter().join(" ")
        );
        let mut child = Command::new(&self.program)
            .args(request.args())
            .current_dir(&request.output_folder)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| self.failure(request, ProcessFailure::Spawn(e)))?;

        let status = wait_with_timeout(&mut child, self.timeout)
            .map_err(|failure| self.failure(request, failure))?;
        if !status.success() {
            return Err(self.failure(request, ProcessFailure::Exit(status)));
        }

        for output in [expected.image(), expected.label()] {
            if !output.is_file() {
                return Err(self.failure(
                    request,
                    ProcessFailure::MissingOutput(output.to_path_buf()),
                ));
            }
        }
        Ok(expected)
    }
}

/// Poll until the child exits; kill it once `timeout` has passed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, ProcessFailure> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if started.elapsed() >= timeout => {
                warn!("renderer still running after {:?}, killing it", timeout);
                if let Err(err) = child.kill() {
                    warn!("could not kill renderer: {}", err);
                }
                // reap so no zombie is left behind
                let _ = child.wait();
                return Err(ProcessFailure::Timeout(timeout));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(ProcessFailure::Wait(err)),
        }
    }
}
