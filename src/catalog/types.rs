//! Raw patch catalog JSON types
//!
//! Serde definitions for the `revanced-patches-*.json` catalog published next
//! to each patch bundle release.

use serde::{Deserialize, Serialize};

use super::value::OptionValue;

/// A patch definition as published upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPatch {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Whether the patch is applied when nothing is selected explicitly
    #[serde(default, rename = "use")]
    pub use_by_default: Option<bool>,

    #[serde(default)]
    pub requires_integrations: Option<bool>,

    #[serde(default)]
    pub options: Option<Vec<RawOption>>,

    /// Target applications; `null` means the patch applies to any app
    #[serde(default)]
    pub compatible_packages: Option<Vec<CompatiblePackage>>,
}

/// A configurable patch option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOption {
    pub key: String,

    #[serde(default)]
    pub default: OptionValue,

    pub title: String,

    pub description: String,

    pub required: bool,
}

/// An application a patch targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatiblePackage {
    /// Android package name (e.g. `com.google.android.youtube`)
    pub name: String,

    /// Compatible version strings; `null` means all versions
    #[serde(default)]
    pub versions: Option<Vec<String>>,
}
