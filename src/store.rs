//! Per-APK option and selection sidecars
//!
//! Two small JSON files live next to each APK:
//! - `<stem>.json` holds option overrides per patch, merged onto catalog
//!   defaults on read and fully rewritten on save;
//! - `<stem>.patches.json` holds the patch names the user selected.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::apk::Apk;
use crate::catalog::{Application, OptionValue, Patch, ValueError};

/// Sidecar errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed sidecar {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown patch '{0}'")]
    UnknownPatch(String),

    #[error("patch '{patch}' has no option '{key}'")]
    UnknownOption { patch: String, key: String },

    #[error("patch '{patch}' is not compatible with version {version}")]
    Incompatible { patch: String, version: String },

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// One entry of the options sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOverrides {
    pub patch_name: String,
    pub options: Vec<OptionOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionOverride {
    pub key: String,
    #[serde(default)]
    pub value: OptionValue,
}

/// How a patch is shown in the patch list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    /// Applied and fully configured
    Selected,
    /// Applied, but a required option has no value
    NeedsAttention,
    Unselected,
    /// Excluded by the patch's version allow-list; can never be selected
    Incompatible,
}

impl PatchState {
    /// Checkbox-style marker for list output
    pub fn marker(&self) -> &'static str {
        match self {
            PatchState::Selected => "[x]",
            PatchState::NeedsAttention => "[~]",
            PatchState::Unselected => "[ ]",
            PatchState::Incompatible => "[!]",
        }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self, PatchState::Selected)
    }
}

/// Display state of a patch for an APK version
pub fn patch_state(patch: &Patch, version: &str) -> PatchState {
    if !patch.is_compatible_with(version) {
        return PatchState::Incompatible;
    }
    if !patch.use_by_default {
        return PatchState::Unselected;
    }
    if patch.missing_required().next().is_some() {
        PatchState::NeedsAttention
    } else {
        PatchState::Selected
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, content).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Catalog application with this APK's option overrides applied.
///
/// Overrides whose patch or key no longer exists are ignored, as are values
/// that no longer fit the option's type.
pub fn load_options(apk: &Apk, app: &Application) -> Result<Application, StoreError> {
    let mut merged = app.clone();
    let path = apk.options_path();

    let Some(overrides) = read_json::<Vec<PatchOverrides>>(&path)? else {
        return Ok(merged);
    };

    for entry in overrides {
        let Some(patch) = merged.patch_mut(&entry.patch_name) else {
            debug!("Ignoring overrides for unknown patch '{}'", entry.patch_name);
            continue;
        };
        for item in entry.options {
            let Some(option) = patch.option_mut(&item.key) else {
                debug!("Ignoring unknown option '{}' of '{}'", item.key, entry.patch_name);
                continue;
            };
            if let Err(e) = option.set(item.value) {
                warn!("{}: {}", path.display(), e);
            }
        }
    }

    Ok(merged)
}

/// Overwrite the options sidecar with every patch that has options
pub fn save_options(apk: &Apk, app: &Application) -> Result<(), StoreError> {
    let entries: Vec<PatchOverrides> = app
        .patches
        .iter()
        .filter(|p| !p.options.is_empty())
        .map(|p| PatchOverrides {
            patch_name: p.name.clone(),
            options: p
                .options
                .iter()
                .map(|o| OptionOverride {
                    key: o.key.clone(),
                    value: o.value.clone(),
                })
                .collect(),
        })
        .collect();

    write_json(&apk.options_path(), &entries)?;
    debug!("Saved options for {}", apk.path.display());
    Ok(())
}

/// Set one option from user input and persist the result.
///
/// Returns the application with all overrides applied.
pub fn set_option(
    apk: &Apk,
    app: &Application,
    patch_name: &str,
    key: &str,
    raw: &str,
) -> Result<Application, StoreError> {
    let mut merged = load_options(apk, app)?;

    let patch = merged
        .patch_mut(patch_name)
        .ok_or_else(|| StoreError::UnknownPatch(patch_name.to_string()))?;
    let option = patch
        .option_mut(key)
        .ok_or_else(|| StoreError::UnknownOption {
            patch: patch_name.to_string(),
            key: key.to_string(),
        })?;

    let value = option.parse_input(raw)?;
    option.set(value)?;

    save_options(apk, &merged)?;
    Ok(merged)
}

/// Patch names from the selection sidecar, if it exists
pub fn load_selection(apk: &Apk) -> Result<Option<Vec<String>>, StoreError> {
    read_json(&apk.selection_path())
}

/// Write the selection sidecar.
///
/// An empty selection writes nothing and leaves an existing file in place.
/// Returns whether the file was written.
pub fn save_selection(apk: &Apk, names: &[String]) -> Result<bool, StoreError> {
    if names.is_empty() {
        return Ok(false);
    }
    write_json(&apk.selection_path(), &names)?;
    Ok(true)
}

/// Remove the selection sidecar so the catalog defaults apply again
pub fn clear_selection(apk: &Apk) -> Result<bool, StoreError> {
    let path = apk.selection_path();
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io { path, source }),
    }
}

/// Check that every name exists and is compatible with the APK's version
pub fn validate_selection(apk: &Apk, app: &Application, names: &[String]) -> Result<(), StoreError> {
    for name in names {
        let patch = app
            .patch(name)
            .ok_or_else(|| StoreError::UnknownPatch(name.clone()))?;
        if patch_state(patch, &apk.version) == PatchState::Incompatible {
            return Err(StoreError::Incompatible {
                patch: name.clone(),
                version: apk.version.clone(),
            });
        }
    }
    Ok(())
}

/// Names of the patches that show as checked before any explicit selection
pub fn default_selection(apk: &Apk, app: &Application) -> Vec<String> {
    app.patches
        .iter()
        .filter(|p| patch_state(p, &apk.version).is_checked())
        .map(|p| p.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    const CATALOG: &str = r#"[
        {"name": "Hide ads", "use": true, "options": [
            {"key": "strict", "default": false, "title": "Strict", "description": "", "required": false},
            {"key": "level", "default": 2, "title": "Level", "description": "", "required": false}
        ], "compatiblePackages": [{"name": "app", "versions": ["1.0"]}]},
        {"name": "Branding", "use": true, "options": [
            {"key": "name", "default": null, "title": "Name", "description": "", "required": true}
        ], "compatiblePackages": [{"name": "app"}]},
        {"name": "Extra", "use": false, "options": [], "compatiblePackages": [{"name": "app"}]}
    ]"#;

    fn fixture(version: &str) -> (tempfile::TempDir, Apk, Application) {
        let temp = tempfile::tempdir().unwrap();
        let apk = Apk::new(temp.path().join("app.apk"), "app", version, "App");
        let catalog = Catalog::parse(CATALOG).unwrap();
        let app = catalog.get("app").unwrap().clone();
        (temp, apk, app)
    }

    #[test]
    fn test_load_without_sidecar_returns_defaults() {
        let (_temp, apk, app) = fixture("1.0");
        assert_eq!(load_options(&apk, &app).unwrap(), app);
    }

    #[test]
    fn test_options_round_trip() {
        let (_temp, apk, app) = fixture("1.0");

        let mut edited = app.clone();
        edited
            .patch_mut("Hide ads")
            .unwrap()
            .option_mut("level")
            .unwrap()
            .set(OptionValue::Int(5))
            .unwrap();
        edited
            .patch_mut("Branding")
            .unwrap()
            .option_mut("name")
            .unwrap()
            .set(OptionValue::Str("Mine".into()))
            .unwrap();

        save_options(&apk, &edited).unwrap();
        let reloaded = load_options(&apk, &app).unwrap();
        assert_eq!(reloaded, edited);
    }

    #[test]
    fn test_save_skips_patches_without_options() {
        let (_temp, apk, app) = fixture("1.0");
        save_options(&apk, &app).unwrap();

        let saved: Vec<PatchOverrides> =
            serde_json::from_str(&std::fs::read_to_string(apk.options_path()).unwrap()).unwrap();
        let names: Vec<_> = saved.iter().map(|p| p.patch_name.as_str()).collect();
        assert_eq!(names, vec!["Hide ads", "Branding"]);
    }

    #[test]
    fn test_unknown_overrides_are_dropped() {
        let (_temp, apk, app) = fixture("1.0");
        std::fs::write(
            apk.options_path(),
            r#"[
                {"patchName": "Gone", "options": [{"key": "x", "value": 1}]},
                {"patchName": "Hide ads", "options": [
                    {"key": "removed", "value": true},
                    {"key": "strict", "value": true},
                    {"key": "level", "value": "not a number"}
                ]}
            ]"#,
        )
        .unwrap();

        let merged = load_options(&apk, &app).unwrap();
        let patch = merged.patch("Hide ads").unwrap();
        assert_eq!(patch.option("strict").unwrap().value, OptionValue::Bool(true));
        assert_eq!(patch.option("level").unwrap().value, OptionValue::Int(2));
        assert!(patch.option("removed").is_none());
    }

    #[test]
    fn test_malformed_sidecar_is_an_error() {
        let (_temp, apk, app) = fixture("1.0");
        std::fs::write(apk.options_path(), "{not json").unwrap();
        assert!(matches!(load_options(&apk, &app), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_set_option() {
        let (_temp, apk, app) = fixture("1.0");

        let merged = set_option(&apk, &app, "Hide ads", "level", "9").unwrap();
        assert_eq!(
            merged.patch("Hide ads").unwrap().option("level").unwrap().value,
            OptionValue::Int(9)
        );

        let reloaded = load_options(&apk, &app).unwrap();
        assert_eq!(
            reloaded.patch("Hide ads").unwrap().option("level").unwrap().value,
            OptionValue::Int(9)
        );

        assert!(matches!(
            set_option(&apk, &app, "Hide ads", "level", "high"),
            Err(StoreError::Value(_))
        ));
        assert!(matches!(
            set_option(&apk, &app, "Nope", "level", "1"),
            Err(StoreError::UnknownPatch(_))
        ));
        assert!(matches!(
            set_option(&apk, &app, "Hide ads", "nope", "1"),
            Err(StoreError::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_patch_states() {
        let (_temp, apk, app) = fixture("1.0");

        assert_eq!(patch_state(app.patch("Hide ads").unwrap(), &apk.version), PatchState::Selected);
        assert_eq!(
            patch_state(app.patch("Branding").unwrap(), &apk.version),
            PatchState::NeedsAttention
        );
        assert_eq!(patch_state(app.patch("Extra").unwrap(), &apk.version), PatchState::Unselected);
    }

    #[test]
    fn test_incompatible_version_forces_unselected() {
        let (_temp, apk, app) = fixture("2.0");
        let patch = app.patch("Hide ads").unwrap();
        assert!(patch.use_by_default);
        assert_eq!(patch_state(patch, &apk.version), PatchState::Incompatible);
        assert!(!default_selection(&apk, &app).contains(&"Hide ads".to_string()));
    }

    #[test]
    fn test_filled_required_option_becomes_selected() {
        let (_temp, apk, app) = fixture("1.0");
        let merged = set_option(&apk, &app, "Branding", "name", "Mine").unwrap();
        assert_eq!(
            patch_state(merged.patch("Branding").unwrap(), &apk.version),
            PatchState::Selected
        );
        assert_eq!(default_selection(&apk, &merged), vec!["Hide ads", "Branding"]);
    }

    #[test]
    fn test_selection_sidecar() {
        let (_temp, apk, _app) = fixture("1.0");

        assert_eq!(load_selection(&apk).unwrap(), None);
        assert!(!save_selection(&apk, &[]).unwrap());
        assert!(!apk.selection_path().exists());

        let names = vec!["Patch A".to_string(), "Patch B".to_string()];
        assert!(save_selection(&apk, &names).unwrap());
        assert_eq!(load_selection(&apk).unwrap(), Some(names.clone()));

        // empty save leaves the previous selection alone
        assert!(!save_selection(&apk, &[]).unwrap());
        assert_eq!(load_selection(&apk).unwrap(), Some(names));

        assert!(clear_selection(&apk).unwrap());
        assert!(!clear_selection(&apk).unwrap());
        assert_eq!(load_selection(&apk).unwrap(), None);
    }

    #[test]
    fn test_validate_selection() {
        let (_temp, apk, app) = fixture("2.0");

        assert!(validate_selection(&apk, &app, &["Extra".to_string()]).is_ok());
        assert!(matches!(
            validate_selection(&apk, &app, &["Hide ads".to_string()]),
            Err(StoreError::Incompatible { .. })
        ));
        assert!(matches!(
            validate_selection(&apk, &app, &["Unknown".to_string()]),
            Err(StoreError::UnknownPatch(_))
        ));
    }
}
