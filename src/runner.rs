//! Patch runner
//!
//! Executes a [`PatchCommand`] as a child process. Both output streams are
//! echoed line by line as they arrive; stderr is also collected and written
//! to the APK's error log when the run produced any.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::apk::Apk;
use crate::command::PatchCommand;

/// Result of one patcher run
#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    /// Expected output artifact
    pub output: Option<PathBuf>,
    /// Whether the output artifact exists after the run
    pub produced: bool,
    /// Everything the patcher wrote to stderr
    pub stderr: String,
    /// Error log written for this run, if stderr was non-empty
    pub error_log: Option<PathBuf>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.success() && self.produced
    }
}

/// Read `stream` line by line, echoing each line and returning them joined
async fn pump<R>(stream: R, to_stderr: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

/// Run the patcher for `apk` and wait for it to exit
pub async fn run(command: &PatchCommand, apk: &Apk) -> Result<RunOutcome> {
    info!("Patching {}", apk.path.display());

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {}", command.program.display()))?;

    let stdout = child.stdout.take().context("Child stdout was not captured")?;
    let stderr = child.stderr.take().context("Child stderr was not captured")?;

    let (_, stderr_text, status) = tokio::join!(pump(stdout, false), pump(stderr, true), child.wait());
    let status = status.context("Failed to wait for patcher")?;

    let error_log = if stderr_text.trim().is_empty() {
        None
    } else {
        let path = apk.error_log();
        write_error_log(&path, &stderr_text)?;
        Some(path)
    };

    let output = apk.output_file();
    let produced = output.as_deref().map(Path::exists).unwrap_or(false);

    if !status.success() {
        warn!("Patcher exited with {} for {}", status, apk.path.display());
    } else if !produced {
        warn!("Patcher finished but produced no output for {}", apk.path.display());
    }

    Ok(RunOutcome {
        status,
        output,
        produced,
        stderr: stderr_text,
        error_log,
    })
}

fn write_error_log(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}
