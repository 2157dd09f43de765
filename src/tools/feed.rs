//! Release feed listing the available tool artifacts

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ToolFolders, ToolKind};

/// Root of the tools feed document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFeed {
    pub tools: Vec<FeedTool>,
}

/// One downloadable artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTool {
    /// Source repository (e.g. `revanced/revanced-cli`)
    pub repository: String,
    pub content_type: String,
    /// Asset file name
    pub name: String,
    pub version: String,
    pub browser_download_url: String,
}

impl FeedTool {
    /// Which tool kind this artifact provides, if any
    pub fn kind(&self) -> Option<ToolKind> {
        match (self.repository.as_str(), self.content_type.as_str()) {
            ("revanced/revanced-patches", "application/java-archive") => Some(ToolKind::PatchBundle),
            ("revanced/revanced-patches", "application/json") => Some(ToolKind::PatchCatalog),
            ("revanced/revanced-integrations", _) => Some(ToolKind::Integrations),
            ("revanced/revanced-cli", _) => Some(ToolKind::Cli),
            _ => None,
        }
    }

    /// Local path this artifact is stored at.
    ///
    /// The catalog is renamed after the bundle version; everything else keeps
    /// its asset name. Only the final path component of remote names is used.
    pub fn destination(&self, folders: &ToolFolders) -> Option<(ToolKind, PathBuf)> {
        let kind = self.kind()?;
        let file_name = match kind {
            ToolKind::PatchCatalog => format!("revanced-patches-{}.json", self.version),
            _ => self.name.clone(),
        };
        let file_name = Path::new(&file_name).file_name()?;
        Some((kind, folders.folder(kind).join(file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(repository: &str, content_type: &str, name: &str, version: &str) -> FeedTool {
        FeedTool {
            repository: repository.to_string(),
            content_type: content_type.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            browser_download_url: format!("https://example.com/{}", name),
        }
    }

    fn folders() -> ToolFolders {
        ToolFolders::under(Path::new("/tools"))
    }

    #[test]
    fn test_feed_parses() {
        let json = r#"{"tools": [{
            "repository": "revanced/revanced-cli",
            "version": "v4.6.0",
            "timestamp": "2024-04-01T00:00:00Z",
            "name": "revanced-cli-4.6.0-all.jar",
            "size": "52000000",
            "browser_download_url": "https://github.com/revanced/revanced-cli/releases/download/v4.6.0/revanced-cli-4.6.0-all.jar",
            "content_type": "application/java-archive"
        }]}"#;
        let feed: ToolFeed = serde_json::from_str(json).unwrap();
        assert_eq!(feed.tools.len(), 1);
        assert_eq!(feed.tools[0].kind(), Some(ToolKind::Cli));
    }

    #[test]
    fn test_destinations() {
        let f = folders();

        let bundle = tool("revanced/revanced-patches", "application/java-archive", "revanced-patches-4.7.0.jar", "v4.7.0");
        assert_eq!(
            bundle.destination(&f),
            Some((ToolKind::PatchBundle, PathBuf::from("/tools/revanced-patches/revanced-patches-4.7.0.jar")))
        );

        let catalog = tool("revanced/revanced-patches", "application/json", "patches.json", "v4.7.0");
        assert_eq!(
            catalog.destination(&f),
            Some((ToolKind::PatchCatalog, PathBuf::from("/tools/revanced-patches/revanced-patches-v4.7.0.json")))
        );

        let integrations = tool(
            "revanced/revanced-integrations",
            "application/vnd.android.package-archive",
            "revanced-integrations-1.8.0.apk",
            "v1.8.0",
        );
        assert_eq!(
            integrations.destination(&f),
            Some((
                ToolKind::Integrations,
                PathBuf::from("/tools/revanced-integrations/revanced-integrations-1.8.0.apk")
            ))
        );
    }

    #[test]
    fn test_unknown_repository_is_skipped() {
        let other = tool("revanced/revanced-manager", "application/vnd.android.package-archive", "manager.apk", "v1");
        assert_eq!(other.kind(), None);
        assert_eq!(other.destination(&folders()), None);
    }

    #[test]
    fn test_remote_name_cannot_escape_folder() {
        let cli = tool("revanced/revanced-cli", "application/java-archive", "../../evil.jar", "v1");
        assert_eq!(
            cli.destination(&folders()),
            Some((ToolKind::Cli, PathBuf::from("/tools/revanced-cli/evil.jar")))
        );
    }
}
