use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use fractal_core::{GeometryPayload, ParameterSet, PayloadMetadata, PayloadSource};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time;

use crate::error::GenerateError;

/// Step size handed to the compute binary; the binary derives its own
/// grid from it and reports the result in the side file.
pub const STEP_SIZE: f64 = 0.05;

/// Well-known output location the compute binary writes its geometry
/// to, relative to the working directory.
pub const SIDE_FILE: &str = "fractal_data.json";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the external surface-extraction binary for one parameter set.
///
/// Exactly one child process is spawned and reaped per call; stdout is
/// advisory log output, stderr is captured as diagnostics, and the
/// geometry itself travels through the JSON side file.
#[derive(Debug, Clone)]
pub struct ComputeInvoker {
    binary: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
}

impl ComputeInvoker {
    pub fn new(binary: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn invoke(&self, params: &ParameterSet) -> Result<GeometryPayload, GenerateError> {
        let mut child = Command::new(&self.binary)
            .args(encode_args(params))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| GenerateError::LaunchFailure {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout_task = tokio::spawn(forward_stdout(child.stdout.take()));
        let stderr_task = tokio::spawn(collect_stderr(child.stderr.take()));

        let status = match time::timeout(self.timeout, child.wait()).await {
            Ok(wait_result) => wait_result.map_err(|source| GenerateError::LaunchFailure {
                binary: self.binary.clone(),
                source,
            })?,
            Err(_) => {
                reap(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(GenerateError::Timeout {
                    timeout: self.timeout,
                });
            }
        };

        let _ = stdout_task.await;
        let diagnostics = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(GenerateError::ExternalFailure {
                status,
                diagnostics: diagnostics.trim().to_string(),
            });
        }

        self.read_side_file(params).await
    }

    async fn read_side_file(
        &self,
        params: &ParameterSet,
    ) -> Result<GeometryPayload, GenerateError> {
        let path = self.workdir.join(SIDE_FILE);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|err| {
            GenerateError::MalformedOutput(format!("cannot read {}: {err}", path.display()))
        })?;
        let side_file: SideFile = serde_json::from_str(&raw).map_err(|err| {
            GenerateError::MalformedOutput(format!("invalid geometry JSON: {err}"))
        })?;

        tracing::debug!(
            triangles = side_file.metadata.triangle_count,
            reported_grid = side_file.metadata.grid_size,
            "compute side file parsed"
        );

        GeometryPayload::with_counts(
            side_file.vertices,
            side_file.indices,
            side_file.metadata.triangle_count,
            side_file.metadata.vertex_count,
            PayloadMetadata::new(params, PayloadSource::Primary),
        )
        .map_err(|err| GenerateError::MalformedOutput(err.to_string()))
    }
}

/// Argument encoding of the compute binary's batch-export mode:
/// `-j <stepSize> <c0> <c1> <c2> <c3> <iterations>`.
fn encode_args(params: &ParameterSet) -> Vec<String> {
    vec![
        "-j".to_string(),
        STEP_SIZE.to_string(),
        params.c[0].to_string(),
        params.c[1].to_string(),
        params.c[2].to_string(),
        params.c[3].to_string(),
        params.iterations.to_string(),
    ]
}

async fn reap(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        tracing::warn!(error = %err, "failed to kill timed-out compute process");
    }
    if let Err(err) = child.wait().await {
        tracing::warn!(error = %err, "failed to reap timed-out compute process");
    }
}

async fn forward_stdout(stdout: Option<ChildStdout>) {
    let Some(stdout) = stdout else { return };
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(line, "compute stdout");
    }
}

async fn collect_stderr(stderr: Option<ChildStderr>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };
    let mut buffer = String::new();
    let _ = BufReader::new(stderr).read_to_string(&mut buffer).await;
    buffer
}

/// Shape of the side file written by the compute binary.
#[derive(Debug, Deserialize)]
struct SideFile {
    metadata: SideFileMetadata,
    vertices: Vec<f64>,
    indices: Vec<u32>,
}

/// The binary also reports iterations, stepSize and juliaC; only the
/// fields the service acts on are kept.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SideFileMetadata {
    triangle_count: usize,
    vertex_count: usize,
    grid_size: f64,
}
