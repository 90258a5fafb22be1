//! Pack descriptors and the catalog they come from.
//!
//! A [`PackDescriptor`] is immutable. Replacing the catalog produces new
//! descriptor instances; two descriptors describe the same content only when
//! both `id` and `version` match.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{PackError, PackResult};
use crate::layout::validate_pack_id;

/// A downloadable pack as declared by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackDescriptor {
    /// Stable pack identifier.
    pub id: String,

    /// Display name.
    #[serde(default, alias = "name")]
    pub title: String,

    /// Display description.
    #[serde(default)]
    pub description: String,

    /// Declared size of the pack data in bytes.
    #[serde(alias = "size")]
    pub size_bytes: u64,

    /// Expected SHA-256 of the pack data, hex encoded.
    #[serde(alias = "hash", alias = "checksum")]
    pub sha256: String,

    /// Download URL.
    pub url: String,

    /// Semantic version string of this pack release.
    pub version: String,
}

impl PackDescriptor {
    /// Create a descriptor with empty display metadata.
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
        size_bytes: u64,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            size_bytes,
            sha256: sha256.into(),
            url: url.into(),
            version: version.into(),
        }
    }

    /// Set the display title (builder pattern).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Whether `other` describes the same release (same id and version).
    pub fn same_release(&self, other: &PackDescriptor) -> bool {
        self.id == other.id && self.version == other.version
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<PackDescriptor>),
    Wrapped { packs: Vec<PackDescriptor> },
}

/// The set of packs currently offered, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PackCatalog {
    packs: HashMap<String, Arc<PackDescriptor>>,
    order: Vec<String>,
}

impl PackCatalog {
    /// Build a catalog from descriptors.
    ///
    /// Later duplicates of an id replace earlier ones. Invalid ids are rejected.
    pub fn new(descriptors: impl IntoIterator<Item = PackDescriptor>) -> PackResult<Self> {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            validate_pack_id(&descriptor.id)?;
            if !catalog.packs.contains_key(&descriptor.id) {
                catalog.order.push(descriptor.id.clone());
            }
            catalog
                .packs
                .insert(descriptor.id.clone(), Arc::new(descriptor));
        }
        Ok(catalog)
    }

    /// Parse a catalog from JSON.
    ///
    /// Accepts either a bare array of descriptors or `{ "packs": [...] }`.
    pub fn from_json(json: &str) -> PackResult<Self> {
        let document: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| PackError::Unknown(format!("failed to parse catalog: {}", e)))?;
        let descriptors = match document {
            CatalogDocument::List(packs) => packs,
            CatalogDocument::Wrapped { packs } => packs,
        };
        Self::new(descriptors)
    }

    /// Look up a descriptor by id.
    pub fn get(&self, id: &str) -> Option<Arc<PackDescriptor>> {
        self.packs.get(id).cloned()
    }

    /// Iterate descriptors in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PackDescriptor>> {
        self.order.iter().filter_map(|id| self.packs.get(id))
    }

    /// Number of packs in the catalog.
    pub fn len(&self) -> usize {
        self.packs.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_array() {
        let json = r#"[
            {"id": "tiles-eu", "title": "Europe tiles", "sizeBytes": 1024,
             "sha256": "ABCD", "url": "https://cdn.example.com/eu.pack", "version": "1.2.0"},
            {"id": "audio-en", "name": "English audio", "size": 10,
             "hash": "ef01", "url": "https://cdn.example.com/en.pack", "version": "0.1.0"}
        ]"#;

        let catalog = PackCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);

        let eu = catalog.get("tiles-eu").unwrap();
        assert_eq!(eu.title, "Europe tiles");
        assert_eq!(eu.size_bytes, 1024);
        assert_eq!(eu.description, "");

        let audio = catalog.get("audio-en").unwrap();
        assert_eq!(audio.title, "English audio");
        assert_eq!(audio.sha256, "ef01");

        let ids: Vec<_> = catalog.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["tiles-eu", "audio-en"]);
    }

    #[test]
    fn test_from_json_wrapped() {
        let json = r#"{"packs": [{"id": "p1", "sizeBytes": 1, "sha256": "00",
            "url": "http://x/p1", "version": "2"}]}"#;
        let catalog = PackCatalog::from_json(json).unwrap();
        assert_eq!(catalog.get("p1").unwrap().version, "2");
    }

    #[test]
    fn test_invalid_id_rejected() {
        let result = PackCatalog::new(vec![PackDescriptor::new("../etc", "1", "u", 1, "00")]);
        assert!(matches!(result, Err(PackError::InvalidPackId(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = PackCatalog::from_json("{not json");
        assert!(matches!(result, Err(PackError::Unknown(_))));
    }

    #[test]
    fn test_same_release() {
        let a = PackDescriptor::new("p1", "1.0.0", "u", 1, "00");
        let b = PackDescriptor::new("p1", "1.0.0", "other-url", 2, "11").with_title("Europe");
        let c = PackDescriptor::new("p1", "1.1.0", "u", 1, "00");
        assert_eq!(b.title, "Europe");
        assert!(a.same_release(&b));
        assert!(!a.same_release(&c));
    }

    #[test]
    fn test_duplicate_ids_replace() {
        let catalog = PackCatalog::new(vec![
            PackDescriptor::new("p1", "1", "u", 1, "00"),
            PackDescriptor::new("p1", "2", "u", 1, "00"),
        ])
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("p1").unwrap().version, "2");
        assert_eq!(catalog.iter().count(), 1);
    }
}
