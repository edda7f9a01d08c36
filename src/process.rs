//! Async subprocess execution with captured, line-buffered output.
//!
//! Stdout and stderr are consumed concurrently, never sequentially, so a
//! chatty tool can never deadlock against a full pipe buffer. Stdout lines
//! log at info, stderr at warn, each tagged with the owning item's name.

use crate::error::ItemError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Resolve a binary on the execution PATH.
pub fn find_in_path(bin: &str) -> Option<PathBuf> {
    let candidate = Path::new(bin);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|p| p.is_file())
}

/// Captured result of one subprocess run.
#[derive(Debug)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

enum LogLevel {
    Info,
    Warn,
}

fn spawn_line_reader<R>(
    reader: R,
    item: String,
    tool: String,
    level: LogLevel,
) -> tokio::task::JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut captured = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            match level {
                LogLevel::Info => info!(item = %item, tool = %tool, "{}", line),
                LogLevel::Warn => warn!(item = %item, tool = %tool, "{}", line),
            }
            captured.push(line);
        }
        captured
    })
}

/// Run a command to completion, logging its output as it arrives.
///
/// `item` tags every log line with the owning item. When `timeout` is given
/// and expires, the child is killed and the run fails with
/// [`ItemError::ProcessTimeout`]; the item's siblings are unaffected.
pub async fn run_logged(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    item: &str,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ItemError> {
    let bin =
        find_in_path(program).ok_or_else(|| ItemError::ToolNotFound(program.to_string()))?;

    info!(item = %item, "running {}", program);
    debug!(item = %item, "running command: {} {}", bin.display(), args.join(" "));

    let mut command = Command::new(&bin);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = stdout.map(|r| {
        spawn_line_reader(r, item.to_string(), program.to_string(), LogLevel::Info)
    });
    let err_task = stderr.map(|r| {
        spawn_line_reader(r, item.to_string(), program.to_string(), LogLevel::Warn)
    });

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(item = %item, "{} timed out after {}s; killing", program, limit.as_secs());
                child.kill().await?;
                return Err(ItemError::ProcessTimeout {
                    tool: program.to_string(),
                    secs: limit.as_secs(),
                });
            }
        },
        None => child.wait().await?,
    };

    let stdout = match out_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = match err_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    let code = status.code();
    match code {
        Some(0) => info!(item = %item, "{} completed successfully with exit code 0", program),
        Some(n) => warn!(item = %item, "{} exited with {}", program, n),
        None => warn!(item = %item, "{} terminated by signal", program),
    }

    Ok(ProcessOutput {
        code,
        stdout,
        stderr,
    })
}
