//! Tool acquisition
//!
//! The patcher needs four artifacts: the CLI jar, the patch bundle jar, the
//! patch catalog JSON and the integrations APK. Each lives in a kind-specific
//! folder; the "current" one is the most recently created matching file.
//! New releases are fetched from a JSON feed when the refresh policy is due.

mod download;
mod feed;
mod policy;

pub use download::{download_file, fetch_feed, HttpClient};
pub use feed::{FeedTool, ToolFeed};
pub use policy::{RefreshPolicy, ToolState};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;

/// The four artifacts a patch run depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Cli,
    PatchBundle,
    PatchCatalog,
    Integrations,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Cli,
        ToolKind::PatchBundle,
        ToolKind::PatchCatalog,
        ToolKind::Integrations,
    ];

    /// File name prefix of this kind's artifacts
    pub fn prefix(&self) -> &'static str {
        match self {
            ToolKind::Cli => "revanced-cli",
            ToolKind::PatchBundle | ToolKind::PatchCatalog => "revanced-patches",
            ToolKind::Integrations => "revanced-integrations",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ToolKind::Cli | ToolKind::PatchBundle => "jar",
            ToolKind::PatchCatalog => "json",
            ToolKind::Integrations => "apk",
        }
    }

    /// Whether a file name belongs to this kind
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(self.prefix())
            && Path::new(file_name)
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(self.extension()))
                .unwrap_or(false)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Cli => "patcher CLI",
            ToolKind::PatchBundle => "patch bundle",
            ToolKind::PatchCatalog => "patch catalog",
            ToolKind::Integrations => "integrations APK",
        };
        f.write_str(name)
    }
}

/// Kind-specific tool folders
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFolders {
    pub cli: PathBuf,
    pub patches: PathBuf,
    pub integrations: PathBuf,
}

impl ToolFolders {
    /// Standard layout under a tools root
    pub fn under(root: &Path) -> Self {
        Self {
            cli: root.join("revanced-cli"),
            patches: root.join("revanced-patches"),
            integrations: root.join("revanced-integrations"),
        }
    }

    pub fn folder(&self, kind: ToolKind) -> &Path {
        match kind {
            ToolKind::Cli => &self.cli,
            ToolKind::PatchBundle | ToolKind::PatchCatalog => &self.patches,
            ToolKind::Integrations => &self.integrations,
        }
    }

    pub fn create_all(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cli)?;
        std::fs::create_dir_all(&self.patches)?;
        std::fs::create_dir_all(&self.integrations)?;
        Ok(())
    }
}

/// Tool errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("no {kind} found in {folder}; run `rvpatch tools` to download it")]
    Missing { kind: ToolKind, folder: PathBuf },
}

/// Resolved current tools
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSet {
    pub cli: Option<PathBuf>,
    pub patch_bundle: Option<PathBuf>,
    pub patch_catalog: Option<PathBuf>,
    pub integrations: Option<PathBuf>,
}

impl ToolSet {
    /// Resolve every kind from its folder
    pub fn resolve(folders: &ToolFolders) -> Self {
        Self {
            cli: resolve_current(folders.folder(ToolKind::Cli), ToolKind::Cli),
            patch_bundle: resolve_current(folders.folder(ToolKind::PatchBundle), ToolKind::PatchBundle),
            patch_catalog: resolve_current(folders.folder(ToolKind::PatchCatalog), ToolKind::PatchCatalog),
            integrations: resolve_current(folders.folder(ToolKind::Integrations), ToolKind::Integrations),
        }
    }

    pub fn get(&self, kind: ToolKind) -> Option<&Path> {
        let path = match kind {
            ToolKind::Cli => &self.cli,
            ToolKind::PatchBundle => &self.patch_bundle,
            ToolKind::PatchCatalog => &self.patch_catalog,
            ToolKind::Integrations => &self.integrations,
        };
        path.as_deref()
    }

    /// Kinds that could not be resolved
    pub fn missing(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }
}

/// Most recently created file of `kind` under `folder`, searched recursively.
///
/// Falls back to modification time where creation time is unavailable; ties
/// are broken by path so repeated calls agree.
pub fn resolve_current(folder: &Path, kind: ToolKind) -> Option<PathBuf> {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| kind.matches(&e.file_name().to_string_lossy()))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            let stamp = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((stamp, e.into_path()))
        })
        .max()
        .map(|(_, path)| path)
}

/// How [`ToolManager::sync`] treats the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Check the feed only when the refresh policy is due
    Auto,
    /// Check the feed regardless of the policy
    Force,
    /// Never touch the network
    Offline,
}

/// Outcome of a sync
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Whether a feed check was attempted
    pub due: bool,
    /// Whether the feed was fetched successfully
    pub checked: bool,
    pub downloaded: Vec<PathBuf>,
    /// Failed downloads as (asset name, error)
    pub failed: Vec<(String, String)>,
    pub tools: ToolSet,
}

/// Keeps the local tool folders up to date
pub struct ToolManager {
    folders: ToolFolders,
    endpoint: String,
    policy: RefreshPolicy,
    state_path: PathBuf,
    snapshot_path: PathBuf,
    client: HttpClient,
}

impl ToolManager {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            folders: config.tool_folders(),
            endpoint: config.tools_endpoint.clone(),
            policy: config.refresh_policy(),
            state_path: config.state_file(),
            snapshot_path: config.feed_snapshot_file(),
            client: HttpClient::new()?,
        })
    }

    pub fn folders(&self) -> &ToolFolders {
        &self.folders
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Check for new tools if due, download missing artifacts, then resolve.
    ///
    /// Network failures are logged and swallowed; whatever is on disk is
    /// still resolved.
    pub async fn sync(&self, mode: SyncMode) -> SyncReport {
        let mut report = SyncReport::default();

        let mut state = ToolState::load(&self.state_path);
        let now = Utc::now();
        report.due = match mode {
            SyncMode::Offline => false,
            SyncMode::Force => true,
            SyncMode::Auto => self.policy.is_due(state.last_checked, now),
        };

        if report.due {
            match fetch_feed(&self.client, &self.endpoint).await {
                Ok((feed, raw)) => {
                    report.checked = true;
                    if let Err(e) = std::fs::write(&self.snapshot_path, raw) {
                        warn!("Could not store feed snapshot {}: {}", self.snapshot_path.display(), e);
                    }
                    state.last_checked = Some(now);
                    if let Err(e) = state.save(&self.state_path) {
                        warn!("Could not save tool state: {:#}", e);
                    }
                    self.download_missing(&feed, &mut report).await;
                }
                Err(e) => warn!("Tool check failed, keeping local tools: {:#}", e),
            }
        } else {
            debug!("Skipping tool check (mode {:?})", mode);
        }

        report.tools = ToolSet::resolve(&self.folders);
        report
    }

    async fn download_missing(&self, feed: &ToolFeed, report: &mut SyncReport) {
        for tool in &feed.tools {
            let Some((kind, destination)) = tool.destination(&self.folders) else {
                continue;
            };
            if destination.exists() {
                debug!("{} already present: {}", kind, destination.display());
                continue;
            }

            info!("Downloading {} {} ({})", kind, tool.version, tool.name);
            match download_file(&self.client, &tool.browser_download_url, &destination).await {
                Ok(bytes) => {
                    info!("Saved {} ({} bytes)", destination.display(), bytes);
                    report.downloaded.push(destination);
                }
                Err(e) => {
                    warn!("Failed to download {}: {:#}", tool.name, e);
                    report.failed.push((tool.name.clone(), format!("{:#}", e)));
                }
            }
        }
    }
}
