//! The reconciliation pass: align the generator's page set with the wiki's.
//! Entries with no mapped page get a placeholder created first; every entry
//! then has its content transformed and pushed. Creation must finish for all
//! entries before any update runs, so that xref links between brand-new
//! pages resolve within the same run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::client::ConfluenceApi;
use crate::manifest::{ManifestEntry, load_site_manifest, load_xref_map};
use crate::mappings::{MappingIndex, collect_mappings};
use crate::transform::{href_path, transform_content};

const PLACEHOLDER_BODY: &str = "<h1>Placeholder</h1>\nThis page is a placeholder.";

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub space_key: String,
    /// Directory the manifest lives in; entry hrefs resolve against it.
    pub site_root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedPage {
    pub title: String,
    pub page_id: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub created: usize,
    pub updated: usize,
    pub pages: Vec<PublishedPage>,
    pub xref_warnings: Vec<String>,
}

/// Full publish flow: load the manifest and xref map, index the pages the
/// wiki already carries, then reconcile.
pub fn publish_site<C: ConfluenceApi>(
    api: &mut C,
    space_key: &str,
    manifest_path: &Path,
) -> Result<PublishReport> {
    let manifest = load_site_manifest(manifest_path)?;
    let site_root = manifest_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .to_path_buf();
    let entries = load_xref_map(&site_root.join(&manifest.xrefmap))?;

    let existing = collect_mappings(api, Some(space_key))?;
    let mut index = MappingIndex::from_mappings(&existing)?;

    let options = PublishOptions {
        space_key: space_key.to_string(),
        site_root,
    };
    reconcile(api, &options, &entries, &mut index)
}

/// Reconcile one build against the page store. Strictly sequential; the
/// first store error aborts the run with pages already written left as-is.
pub fn reconcile<C: ConfluenceApi>(
    api: &mut C,
    options: &PublishOptions,
    entries: &[ManifestEntry],
    index: &mut MappingIndex,
) -> Result<PublishReport> {
    let mut report = PublishReport::default();

    // Step 1: classify by uid.
    let mut known: Vec<(&ManifestEntry, String, bool)> = Vec::new();
    let mut unmapped: Vec<&ManifestEntry> = Vec::new();
    for entry in entries {
        match index.page_id_for_uid(&entry.uid) {
            Some(page_id) => known.push((entry, page_id.to_string(), false)),
            None => {
                println!(
                    "No mapping in Confluence for DocFX UID '{}' (a new page will be created).",
                    entry.uid
                );
                unmapped.push(entry);
            }
        }
    }

    // Step 2: create placeholders and register the new ids in both lookup
    // tables before any content update runs.
    if !unmapped.is_empty() {
        println!("Need to create {} new pages in Confluence:", unmapped.len());
        for entry in unmapped {
            let title = page_title(entry);
            println!("\t{} (UID='{}') => '{}'", entry.href, entry.uid, title);

            let page_id = api
                .create_page(
                    &options.space_key,
                    &title,
                    PLACEHOLDER_BODY,
                    &entry.uid,
                    &entry.href,
                )
                .with_context(|| format!("failed to create page for DocFX UID '{}'", entry.uid))?;
            index.register(&entry.uid, &entry.href, &page_id);

            println!("\tCreated: {} (UID='{}') => {}", entry.href, entry.uid, page_id);
            report.created += 1;
            known.push((entry, page_id, true));
        }
    }

    // Step 3: push transformed content for every entry, including the ones
    // created above.
    for (entry, page_id, freshly_created) in &known {
        let title = page_title(entry);
        let (base_dir, local_path) = local_content_path(&options.site_root, &entry.href);

        let raw = read_page_source(&local_path)
            .with_context(|| format!("failed to load content for DocFX UID '{}'", entry.uid))?;
        let transformed = transform_content(&base_dir, &raw, index.hrefs());
        for warning in &transformed.warnings {
            println!("WARNING - {warning}");
        }

        println!("Updating Confluence page {page_id}...");
        api.update_page(page_id, &title, &transformed.body, &entry.uid, &entry.href)
            .with_context(|| format!("failed to update page {page_id} for DocFX UID '{}'", entry.uid))?;
        println!("\tUpdated: {} (UID='{}') => {}", entry.href, entry.uid, page_id);

        report.updated += 1;
        report.xref_warnings.extend(transformed.warnings);
        report.pages.push(PublishedPage {
            title,
            page_id: page_id.clone(),
            action: if *freshly_created {
                "created".to_string()
            } else {
                "updated".to_string()
            },
        });
    }

    Ok(report)
}

/// Deterministic page title so re-runs that fail after creation can still be
/// correlated by hand.
fn page_title(entry: &ManifestEntry) -> String {
    format!("DocFX - {} ({})", entry.name, entry.uid)
}

/// Local file holding an entry's generated content, plus the directory (the
/// transform base) the page lives in. Root-level pages get an empty base.
fn local_content_path(site_root: &Path, href: &str) -> (String, PathBuf) {
    let path = href_path(href).trim_start_matches('/');
    let base_dir = match path.rfind('/') {
        Some(index) => path[..index].to_string(),
        None => String::new(),
    };

    let mut local = site_root.to_path_buf();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        local.push(segment);
    }
    (base_dir, local)
}

/// Generated files occasionally carry byte-order-mark sequences at line
/// starts; strip them before transformation.
fn read_page_source(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}'))
        .collect::<Vec<_>>()
        .join("\n"))
}
