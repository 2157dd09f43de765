//! Discovered APK files
//!
//! An [`Apk`] is a located file plus the metadata read from it. Sidecar and
//! output paths are derived from the record, never stored.

mod inspect;

pub use inspect::{parse_badging, ApkInspector, Badging};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

/// Version reported when the inspector could not determine one
pub const UNKNOWN_VERSION: &str = "0.0";

/// A discovered APK and its detected metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Apk {
    pub path: PathBuf,
    /// Android package name
    pub package: String,
    pub version: String,
    /// Display label with spaces replaced by underscores
    pub title: String,
    pub output_folder: Option<PathBuf>,
}

impl Apk {
    pub fn new(
        path: impl Into<PathBuf>,
        package: impl Into<String>,
        version: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            package: package.into(),
            version: version.into(),
            title: title.into(),
            output_folder: None,
        }
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(folder.into());
        self
    }

    /// Per-APK options sidecar (`<stem>.json`)
    pub fn options_path(&self) -> PathBuf {
        self.path.with_extension("json")
    }

    /// Per-APK patch selection sidecar (`<stem>.patches.json`)
    pub fn selection_path(&self) -> PathBuf {
        self.path.with_extension("patches.json")
    }

    /// Patched output artifact, if an output folder is set
    pub fn output_file(&self) -> Option<PathBuf> {
        self.output_folder
            .as_ref()
            .map(|folder| folder.join(format!("ReVanced-{}-{}.apk", self.title, self.version)))
    }

    /// Where stderr of a patch run for this APK is written
    pub fn error_log(&self) -> PathBuf {
        match self.output_file() {
            Some(output) => output.with_extension("error"),
            None => self.path.with_extension("error"),
        }
    }

    /// APKMirror search for this package
    pub fn mirror_search_url(&self) -> String {
        format!("https://www.apkmirror.com/?s={}", self.package)
    }

    pub fn has_known_version(&self) -> bool {
        self.version != UNKNOWN_VERSION
    }

    /// Canonical file name: `<title>-<version>.apk`, slugified
    pub fn normalized_file_name(&self) -> String {
        slugify(&format!("{}-{}.apk", self.title, self.version))
    }

    /// Rename the file to its canonical name, moving its sidecars along.
    ///
    /// Skipped when the version is unknown, the name is already canonical, or
    /// the target (or one of its sidecars) already exists. Returns whether
    /// the file was renamed.
    pub fn normalize_name(&mut self) -> io::Result<bool> {
        if !self.has_known_version() {
            return Ok(false);
        }

        let parent = self.path.parent().unwrap_or_else(|| Path::new(""));
        let target = Apk {
            path: parent.join(self.normalized_file_name()),
            ..self.clone()
        };
        if target.path == self.path || target.path.exists() {
            return Ok(false);
        }

        let sidecars: Vec<(PathBuf, PathBuf)> = [
            (self.options_path(), target.options_path()),
            (self.selection_path(), target.selection_path()),
        ]
        .into_iter()
        .filter(|(from, _)| from.exists())
        .collect();
        if sidecars.iter().any(|(_, to)| to.exists()) {
            debug!("Not renaming {}: sidecars would be overwritten", self.path.display());
            return Ok(false);
        }

        std::fs::rename(&self.path, &target.path)?;
        for (from, to) in &sidecars {
            std::fs::rename(from, to)?;
        }
        info!("Renamed {} -> {}", self.path.display(), target.path.display());
        self.path = target.path;
        Ok(true)
    }
}

/// Recursively find all `.apk` files under a folder, sorted by path
pub fn discover_apks(folder: &Path) -> Vec<PathBuf> {
    let mut apks: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("apk"))
                .unwrap_or(false)
        })
        .collect();

    apks.sort();
    debug!("Found {} APKs under {}", apks.len(), folder.display());
    apks
}

/// Turn a string into a safe file name.
///
/// ASCII-folds, drops everything except word characters, whitespace, dots
/// and dashes, collapses whitespace/dash runs to one dash and trims leading
/// and trailing dashes and underscores. Case is preserved.
pub fn slugify(value: &str) -> String {
    static INVALID_RE: OnceLock<Regex> = OnceLock::new();
    static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

    let ascii: String = value.nfkd().filter(char::is_ascii).collect();

    let invalid = INVALID_RE.get_or_init(|| Regex::new(r"[^.\w\s-]").unwrap());
    let separators = SEPARATOR_RE.get_or_init(|| Regex::new(r"[-\s]+").unwrap());

    let cleaned = invalid.replace_all(&ascii, "");
    let dashed = separators.replace_all(&cleaned, "-");
    dashed.trim_matches(|c: char| c == '-' || c == '_').to_string()
}
