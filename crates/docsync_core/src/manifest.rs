//! DocFX build outputs consumed by the publish pipeline: the site manifest
//! (only read for its cross-reference map pointer) and the cross-reference
//! map itself, which lists every page the generator produced.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// `manifest.json` from the generated site root. Only the `xrefmap` entry is
/// needed; everything else in the manifest is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteManifest {
    pub xrefmap: String,
}

/// One page of the generated site. `uid` is unique across the build; `href`
/// is the page's root-relative path in the output tree.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub uid: String,
    pub href: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct XrefMap {
    references: Vec<ManifestEntry>,
}

pub fn load_site_manifest(path: &Path) -> Result<SiteManifest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read DocFX manifest {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse DocFX manifest {}", path.display()))
}

pub fn load_xref_map(path: &Path) -> Result<Vec<ManifestEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read DocFX xref map {}", path.display()))?;
    let map: XrefMap = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse DocFX xref map {}", path.display()))?;
    Ok(map.references)
}
