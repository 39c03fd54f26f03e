//! The dataset catalog: which datasets exist, their metadata, and where each
//! one's archive bundle can be read from.
//!
//! Fetching bundles over the network is the catalog's concern, not the
//! pipeline's. [`DirectoryCatalog`] serves a catalog already mirrored to a
//! local directory.

use std::{
  future::Future,
  path::{Path, PathBuf},
};

use resolver_core::record::ObjectData;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Catalog index file inside a [`DirectoryCatalog`] root.
pub const CATALOG_FILE: &str = "catalog.json";

/// One catalog entry: the dataset key, the archive bundle (absent for
/// metadata-only datasets), and every other metadata field as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDataset {
  pub key:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub archive:  Option<String>,
  #[serde(flatten)]
  pub metadata: ObjectData,
}

impl CatalogDataset {
  pub fn title(&self) -> Option<&str> {
    self.metadata.get("title").and_then(|v| v.as_str())
  }

  /// Metadata as stored on the dataset: `title` becomes `label` and `doi`
  /// becomes `sameas`.
  pub fn dataset_data(&self) -> ObjectData {
    let mut data = self.metadata.clone();
    for (from, to) in [("title", "label"), ("doi", "sameas")] {
      if let Some(value) = data.remove(from) {
        data.insert(to.to_owned(), value);
      }
    }
    data
  }
}

pub trait Catalog: Send + Sync {
  /// Every published dataset, in processing order.
  fn datasets(&self) -> impl Future<Output = Result<Vec<CatalogDataset>>> + Send + '_;

  /// Local path of the dataset's archive bundle, or `None` if it publishes
  /// metadata only.
  fn fetch_archive<'a>(
    &'a self,
    dataset: &'a CatalogDataset,
  ) -> impl Future<Output = Result<Option<PathBuf>>> + Send + 'a;
}

// ─── Directory catalog ───────────────────────────────────────────────────────

/// A catalog mirrored to disk: `catalog.json` plus the archive files it
/// names, relative to the same directory.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
  root: PathBuf,
}

impl DirectoryCatalog {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }
}

impl Catalog for DirectoryCatalog {
  async fn datasets(&self) -> Result<Vec<CatalogDataset>> {
    let bytes = tokio::fs::read(self.root.join(CATALOG_FILE)).await?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  async fn fetch_archive<'a>(&'a self, dataset: &'a CatalogDataset) -> Result<Option<PathBuf>> {
    let Some(archive) = dataset.archive.as_deref() else {
      return Ok(None);
    };
    let path = self.root.join(archive);
    if !tokio::fs::try_exists(&path).await? {
      return Err(Error::Catalog(format!(
        "archive {archive:?} of dataset {} is missing",
        dataset.key
      )));
    }
    Ok(Some(path))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn entries_keep_unknown_metadata() {
    let entries: Vec<CatalogDataset> = serde_json::from_value(json!([
      { "key": "ds-a", "archive": "ds-a.zip", "title": "Birds", "modified": "2024-01-01" },
      { "key": "ds-b", "title": "Checklist" },
    ]))
    .unwrap();

    assert_eq!(entries[0].archive.as_deref(), Some("ds-a.zip"));
    assert_eq!(entries[0].metadata.get("modified"), Some(&json!("2024-01-01")));
    assert!(!entries[0].metadata.contains_key("key"));
    assert_eq!(entries[1].archive, None);
    assert_eq!(entries[1].title(), Some("Checklist"));
  }

  #[test]
  fn title_and_doi_are_renamed() {
    let entry: CatalogDataset = serde_json::from_value(json!({
      "key": "ds", "title": "Birds", "doi": "10.15468/abc", "modified": "2024-01-01",
    }))
    .unwrap();

    assert_eq!(
      entry.dataset_data(),
      json!({ "label": "Birds", "sameas": "10.15468/abc", "modified": "2024-01-01" })
        .as_object()
        .cloned()
        .unwrap()
    );
  }
}
