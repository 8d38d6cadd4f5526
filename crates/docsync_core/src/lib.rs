//! Core library for publishing generated DocFX web sites into Confluence:
//! page-store client, mapping index, content transformation, and the
//! reconciliation pass that drives create/update decisions.

pub mod client;
pub mod config;
pub mod manifest;
pub mod mappings;
pub mod reconcile;
pub mod transform;
