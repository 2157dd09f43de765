//! Patch catalog normalization.
//!
//! The upstream catalog is a flat list of patches, each naming the
//! applications it targets. This module turns it into a per-application view:
//! every application gets its own value-copy of the patches applicable to it,
//! so editing one application's options never affects another's.
//!
//! Patches without a target list are "General Apps" patches. They seed every
//! application and also serve as the fallback for unknown packages.

mod types;
mod value;

pub use types::{CompatiblePackage, RawOption, RawPatch};
pub use value::{OptionValue, PatchOption, ValueError, ValueKind};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Name of the synthetic application holding app-agnostic patches
pub const GENERAL_APPS: &str = "General Apps";

/// Reported by [`Application::latest_version`] when no patch restricts versions
pub const LATEST: &str = "Latest";

/// Catalog loading errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read patch catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed patch catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid patch at index {index}: {reason}")]
    Invalid { index: usize, reason: String },
}

/// A named transformation unit, owned by one application
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub name: String,
    pub description: Option<String>,
    pub use_by_default: bool,
    pub requires_integrations: bool,
    pub options: Vec<PatchOption>,
    /// Compatible app versions; `None` means all versions
    pub versions: Option<Vec<String>>,
}

impl Patch {
    fn from_raw(raw: &RawPatch, versions: Option<Vec<String>>) -> Self {
        let mut options: Vec<PatchOption> = Vec::new();
        for opt in raw.options.iter().flatten() {
            let option = PatchOption::new(
                opt.key.clone(),
                opt.default.clone(),
                opt.title.clone(),
                opt.description.clone(),
                opt.required,
            );
            match options.iter_mut().find(|o| o.key == option.key) {
                Some(existing) => *existing = option,
                None => options.push(option),
            }
        }

        Self {
            name: raw.name.clone(),
            description: raw.description.clone(),
            use_by_default: raw.use_by_default.unwrap_or(false),
            requires_integrations: raw.requires_integrations.unwrap_or(false),
            options,
            versions,
        }
    }

    pub fn option(&self, key: &str) -> Option<&PatchOption> {
        self.options.iter().find(|o| o.key == key)
    }

    pub fn option_mut(&mut self, key: &str) -> Option<&mut PatchOption> {
        self.options.iter_mut().find(|o| o.key == key)
    }

    /// Check whether the patch can be applied to the given app version
    pub fn is_compatible_with(&self, version: &str) -> bool {
        match &self.versions {
            Some(versions) => versions.iter().any(|v| v == version),
            None => true,
        }
    }

    /// Required options that still lack a concrete value
    pub fn missing_required(&self) -> impl Iterator<Item = &PatchOption> {
        self.options.iter().filter(|o| o.is_missing())
    }
}

/// A target application and the patches applicable to it
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub name: String,
    pub patches: Vec<Patch>,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patches: Vec::new(),
        }
    }

    pub fn patch(&self, name: &str) -> Option<&Patch> {
        self.patches.iter().find(|p| p.name == name)
    }

    pub fn patch_mut(&mut self, name: &str) -> Option<&mut Patch> {
        self.patches.iter_mut().find(|p| p.name == name)
    }

    /// Insert a patch, replacing a same-named one in place.
    ///
    /// Last seen wins; the first occurrence keeps its position.
    pub fn upsert(&mut self, patch: Patch) {
        match self.patches.iter().position(|p| p.name == patch.name) {
            Some(index) => {
                debug!("Duplicate patch '{}' in {}, keeping last", patch.name, self.name);
                self.patches[index] = patch;
            }
            None => self.patches.push(patch),
        }
    }

    /// Highest version named by any patch's allow-list, compared as strings.
    ///
    /// Returns [`LATEST`] when no patch restricts versions.
    pub fn latest_version(&self) -> &str {
        self.patches
            .iter()
            .filter_map(|p| p.versions.as_ref())
            .flatten()
            .map(String::as_str)
            .max()
            .unwrap_or(LATEST)
    }

    /// True if any patch is applied by default
    pub fn has_defaults(&self) -> bool {
        self.patches.iter().any(|p| p.use_by_default)
    }
}

/// The normalized catalog
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    general: Application,
    applications: BTreeMap<String, Application>,
}

impl Catalog {
    /// Load and normalize a catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::parse(&content)?;
        debug!(
            "Loaded catalog {} with {} applications",
            path.display(),
            catalog.applications.len()
        );
        Ok(catalog)
    }

    /// Parse and normalize catalog JSON text
    pub fn parse(json: &str) -> Result<Self, CatalogError> {
        let raw: Vec<RawPatch> = serde_json::from_str(json)?;
        Self::from_raw(&raw)
    }

    /// Build the per-application view from raw patch definitions
    pub fn from_raw(raw: &[RawPatch]) -> Result<Self, CatalogError> {
        validate(raw)?;

        let mut general = Application::new(GENERAL_APPS);
        for patch in raw.iter().filter(|p| p.compatible_packages.is_none()) {
            general.upsert(Patch::from_raw(patch, None));
        }

        let mut applications: BTreeMap<String, Application> = BTreeMap::new();
        for patch in raw {
            let Some(packages) = &patch.compatible_packages else {
                continue;
            };
            for package in packages {
                let app = applications
                    .entry(package.name.clone())
                    .or_insert_with(|| Application {
                        name: package.name.clone(),
                        patches: general.patches.clone(),
                    });
                app.upsert(Patch::from_raw(patch, package.versions.clone()));
            }
        }

        Ok(Self {
            general,
            applications,
        })
    }

    /// The synthetic application holding app-agnostic patches
    pub fn general(&self) -> &Application {
        &self.general
    }

    pub fn get(&self, package: &str) -> Option<&Application> {
        self.applications.get(package)
    }

    /// Resolve the application for a package, falling back to General Apps
    pub fn application_for(&self, package: &str) -> &Application {
        self.applications.get(package).unwrap_or(&self.general)
    }

    /// All applications, General Apps first, then by package name
    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        std::iter::once(&self.general).chain(self.applications.values())
    }

    /// Number of applications, not counting General Apps
    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty() && self.general.patches.is_empty()
    }
}

fn validate(raw: &[RawPatch]) -> Result<(), CatalogError> {
    for (index, patch) in raw.iter().enumerate() {
        if patch.name.trim().is_empty() {
            return Err(CatalogError::Invalid {
                index,
                reason: "patch name is empty".to_string(),
            });
        }
        for option in patch.options.iter().flatten() {
            if option.key.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    index,
                    reason: format!("option with empty key in patch '{}'", patch.name),
                });
            }
        }
        for package in patch.compatible_packages.iter().flatten() {
            if package.name.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    index,
                    reason: format!("compatible package with empty name in patch '{}'", patch.name),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {
            "name": "Spoof client",
            "description": "Works on any app",
            "use": true,
            "options": [],
            "compatiblePackages": null
        },
        {
            "name": "Custom branding",
            "description": null,
            "use": false,
            "options": [
                {"key": "appName", "default": "ReVanced", "title": "App name", "description": "Name shown", "required": true}
            ],
            "compatiblePackages": null
        },
        {
            "name": "Hide ads",
            "use": true,
            "requiresIntegrations": true,
            "options": [
                {"key": "strict", "default": false, "title": "Strict", "description": "", "required": false}
            ],
            "compatiblePackages": [
                {"name": "com.google.android.youtube", "versions": ["1.0", "2.3"]},
                {"name": "com.google.android.apps.youtube.music", "versions": null}
            ]
        },
        {
            "name": "Minimized playback",
            "options": [],
            "compatiblePackages": [
                {"name": "com.google.android.youtube", "versions": ["1.5"]}
            ]
        }
    ]"#;

    #[test]
    fn test_general_patches_seed_every_application() {
        let catalog = Catalog::parse(CATALOG).unwrap();

        assert_eq!(catalog.general().patches.len(), 2);
        assert_eq!(catalog.len(), 2);

        let youtube = catalog.get("com.google.android.youtube").unwrap();
        let names: Vec<_> = youtube.patches.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Spoof client", "Custom branding", "Hide ads", "Minimized playback"]
        );

        let music = catalog.get("com.google.android.apps.youtube.music").unwrap();
        assert_eq!(music.patches.len(), 3);
    }

    #[test]
    fn test_copies_are_independent() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let mut youtube = catalog.get("com.google.android.youtube").unwrap().clone();

        youtube
            .patch_mut("Hide ads")
            .unwrap()
            .option_mut("strict")
            .unwrap()
            .set(OptionValue::Bool(true))
            .unwrap();

        let music = catalog.get("com.google.android.apps.youtube.music").unwrap();
        let strict = music.patch("Hide ads").unwrap().option("strict").unwrap();
        assert_eq!(strict.value, OptionValue::Bool(false));
    }

    #[test]
    fn test_versions_attached_per_application() {
        let catalog = Catalog::parse(CATALOG).unwrap();

        let youtube = catalog.get("com.google.android.youtube").unwrap();
        assert_eq!(
            youtube.patch("Hide ads").unwrap().versions,
            Some(vec!["1.0".to_string(), "2.3".to_string()])
        );

        let music = catalog.get("com.google.android.apps.youtube.music").unwrap();
        assert_eq!(music.patch("Hide ads").unwrap().versions, None);
    }

    #[test]
    fn test_latest_version() {
        let catalog = Catalog::parse(CATALOG).unwrap();

        let youtube = catalog.get("com.google.android.youtube").unwrap();
        assert_eq!(youtube.latest_version(), "2.3");

        let music = catalog.get("com.google.android.apps.youtube.music").unwrap();
        assert_eq!(music.latest_version(), LATEST);
        assert_eq!(catalog.general().latest_version(), LATEST);
    }

    #[test]
    fn test_unknown_package_falls_back_to_general() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let app = catalog.application_for("org.example.unknown");
        assert_eq!(app.name, GENERAL_APPS);
    }

    #[test]
    fn test_duplicate_patch_last_wins() {
        let json = r#"[
            {"name": "A", "description": "first", "compatiblePackages": [{"name": "app"}]},
            {"name": "B", "compatiblePackages": [{"name": "app"}]},
            {"name": "A", "description": "second", "compatiblePackages": [{"name": "app"}]}
        ]"#;
        let catalog = Catalog::parse(json).unwrap();
        let app = catalog.get("app").unwrap();

        assert_eq!(app.patches.len(), 2);
        assert_eq!(app.patches[0].name, "A");
        assert_eq!(app.patches[0].description.as_deref(), Some("second"));
    }

    #[test]
    fn test_use_defaults() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let youtube = catalog.get("com.google.android.youtube").unwrap();

        assert!(youtube.has_defaults());
        assert!(!youtube.patch("Minimized playback").unwrap().use_by_default);
        assert!(youtube.patch("Hide ads").unwrap().requires_integrations);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let json = r#"[{"description": "no name", "compatiblePackages": null}]"#;
        assert!(matches!(Catalog::parse(json), Err(CatalogError::Parse(_))));

        let json = r#"[{"name": "X", "options": [{"key": "k", "title": "t"}], "compatiblePackages": null}]"#;
        assert!(matches!(Catalog::parse(json), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let json = r#"[{"name": "ok"}, {"name": "  "}]"#;
        match Catalog::parse(json) {
            Err(CatalogError::Invalid { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let result = Catalog::load(&temp.path().join("missing.json"));
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }

    #[test]
    fn test_list_default_collapses() {
        let json = r#"[{"name": "X", "options": [
            {"key": "channels", "default": ["a", "b"], "title": "t", "description": "d", "required": false}
        ], "compatiblePackages": null}]"#;
        let catalog = Catalog::parse(json).unwrap();
        let option = catalog.general().patches[0].option("channels").unwrap();
        assert_eq!(option.value, OptionValue::Str("a,b".into()));
        assert_eq!(option.kind(), ValueKind::Str);
    }
}
