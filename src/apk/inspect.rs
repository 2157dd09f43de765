//! APK metadata extraction via `aapt dump badging`

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use super::{Apk, UNKNOWN_VERSION};

/// Fields recovered from `aapt dump badging` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badging {
    pub package: String,
    pub version: String,
    pub title: String,
}

/// Parse `aapt dump badging` stdout.
///
/// Returns `None` unless both the package line and the application label
/// are present.
pub fn parse_badging(output: &str) -> Option<Badging> {
    static PACKAGE_RE: OnceLock<Regex> = OnceLock::new();
    static LABEL_RE: OnceLock<Regex> = OnceLock::new();

    let package_re = PACKAGE_RE.get_or_init(|| {
        Regex::new(r"package: name='([^']*)' versionCode='[0-9]*' versionName='([^']*)'").unwrap()
    });
    let label_re = LABEL_RE.get_or_init(|| Regex::new(r"(?m)^application-label:'(.*)'\r?$").unwrap());

    let package_caps = package_re.captures(output)?;
    let label_caps = label_re.captures(output)?;

    let package = package_caps.get(1)?.as_str().to_string();
    let version = match package_caps.get(2)?.as_str() {
        "" => UNKNOWN_VERSION.to_string(),
        v => v.to_string(),
    };
    let title = label_caps.get(1)?.as_str().replace(' ', "_");

    Some(Badging {
        package,
        version,
        title,
    })
}

/// Runs the external package inspector
#[derive(Debug, Clone)]
pub struct ApkInspector {
    aapt: PathBuf,
    error_log: PathBuf,
    output_folder: Option<PathBuf>,
}

impl ApkInspector {
    /// `error_log` is the shared log that receives inspector stderr
    pub fn new(aapt: impl Into<PathBuf>, error_log: impl Into<PathBuf>) -> Self {
        Self {
            aapt: aapt.into(),
            error_log: error_log.into(),
            output_folder: None,
        }
    }

    /// Output folder assigned to every inspected record
    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(folder.into());
        self
    }

    /// Inspect an APK.
    ///
    /// Returns `None` if the tool fails or its output cannot be parsed; any
    /// stderr it produced is appended to the shared error log.
    pub fn inspect(&self, path: &Path) -> Option<Apk> {
        let output = match Command::new(&self.aapt)
            .arg("dump")
            .arg("badging")
            .arg(path)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run {}: {}", self.aapt.display(), e);
                return None;
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!("Inspection of {} failed ({})", path.display(), output.status);
            self.append_error(&stderr);
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(badging) = parse_badging(&stdout) else {
            warn!("Could not parse package info for {}", path.display());
            self.append_error(&stderr);
            return None;
        };

        if !stderr.trim().is_empty() {
            debug!("{} warnings: {}", self.aapt.display(), stderr.trim());
        }

        debug!(
            "{}: {} {} ({})",
            path.display(),
            badging.package,
            badging.version,
            badging.title
        );

        let apk = Apk::new(path, badging.package, badging.version, badging.title);
        Some(match &self.output_folder {
            Some(folder) => apk.with_output_folder(folder),
            None => apk,
        })
    }

    /// Append inspector stderr to the shared log; empty output is skipped
    fn append_error(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(parent) = self.error_log.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.error_log)
            .and_then(|mut file| file.write_all(text.as_bytes()));

        if let Err(e) = result {
            warn!("Could not write error log {}: {}", self.error_log.display(), e);
        }
    }
}
