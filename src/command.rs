//! Patcher command synthesis
//!
//! Turns an APK, its merged catalog entry and the resolved tools into the
//! exact `java -jar revanced-cli.jar patch ...` invocation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::apk::Apk;
use crate::catalog::Application;
use crate::store::{self, StoreError};
use crate::tools::{ToolKind, ToolSet};

/// Synthesis errors
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("ERROR: No Patches Selected and No defaults Found")]
    NoPatchesSelected,

    #[error("no {0} available; run `rvpatch tools`")]
    MissingTool(ToolKind),

    #[error("no output folder set for {0}")]
    NoOutputFolder(PathBuf),

    #[error("failed to resolve {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A ready-to-run patcher invocation
#[derive(Debug, Clone, PartialEq)]
pub struct PatchCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Patch names passed with `--include`, in order
    pub includes: Vec<String>,
}

impl PatchCommand {
    /// Single display line, every argument except flags double-quoted
    pub fn command_line(&self) -> String {
        let mut line = quote(&self.program.to_string_lossy());
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            line.push(' ');
            if arg.starts_with("--") || arg == "-jar" || arg == "patch" {
                line.push_str(&arg);
            } else {
                line.push_str(&quote(&arg));
            }
        }
        line
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

fn absolute(path: &Path) -> Result<PathBuf, SynthesisError> {
    std::path::absolute(path).map_err(|source| SynthesisError::Path {
        path: path.to_path_buf(),
        source,
    })
}

fn required_tool(tools: &ToolSet, kind: ToolKind) -> Result<PathBuf, SynthesisError> {
    let path = tools.get(kind).ok_or(SynthesisError::MissingTool(kind))?;
    absolute(path)
}

/// Build the patcher command for `apk`.
///
/// A selection sidecar decides the patches whenever it exists, even when it
/// lists none; otherwise the patcher falls back to the catalog's `use`
/// flags, which must select at least one patch.
pub fn synthesize(
    apk: &Apk,
    app: &Application,
    tools: &ToolSet,
    java: &Path,
) -> Result<PatchCommand, SynthesisError> {
    let includes = match store::load_selection(apk)? {
        Some(names) => names,
        None if app.has_defaults() => Vec::new(),
        None => return Err(SynthesisError::NoPatchesSelected),
    };

    let cli = required_tool(tools, ToolKind::Cli)?;
    let bundle = required_tool(tools, ToolKind::PatchBundle)?;
    let integrations = required_tool(tools, ToolKind::Integrations)?;
    let output = apk
        .output_file()
        .ok_or_else(|| SynthesisError::NoOutputFolder(apk.path.clone()))?;

    let mut args: Vec<OsString> = vec![
        "-jar".into(),
        cli.into(),
        "patch".into(),
        "--out".into(),
        absolute(&output)?.into(),
        "--patch-bundle".into(),
        bundle.into(),
        "--merge".into(),
        integrations.into(),
    ];

    for name in &includes {
        args.push("--include".into());
        args.push(name.into());
    }

    let options = apk.options_path();
    if options.exists() {
        args.push("--options".into());
        args.push(absolute(&options)?.into());
    }

    args.push(absolute(&apk.path)?.into());

    let command = PatchCommand {
        program: java.to_path_buf(),
        args,
        includes,
    };
    debug!("Patch command: {}", command.command_line());
    Ok(command)
}
