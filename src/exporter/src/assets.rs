//! Asset references embedded in exported documents.
//!
//! Documents point at binary assets through objects of the shape
//! `{"_type": "reference", "_ref": "image-<hash>-<W>x<H>-<fmt>"}` (or
//! `file-<hash>-<ext>`). A document is lowered into a [`DocumentNode`] tree
//! and walked recursively; reference strings outside the grammar are plain
//! document references and are ignored.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^image-([0-9a-fA-F]+)-([0-9]+)x([0-9]+)-([A-Za-z0-9]+)$")
        .expect("valid image reference regex")
});

static FILE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^file-([0-9a-fA-F]+)-([A-Za-z0-9]+)$").expect("valid file reference regex")
});

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetReference {
    Image {
        hash: String,
        width: u32,
        height: u32,
        format: String,
    },
    File {
        hash: String,
        extension: String,
    },
}

impl AssetReference {
    /// Parses a reference string; `None` for anything outside the grammar.
    pub fn parse(reference: &str) -> Option<Self> {
        if let Some(caps) = IMAGE_REF.captures(reference) {
            return Some(AssetReference::Image {
                hash: caps[1].to_string(),
                width: caps[2].parse().ok()?,
                height: caps[3].parse().ok()?,
                format: caps[4].to_string(),
            });
        }

        FILE_REF
            .captures(reference)
            .map(|caps| AssetReference::File {
                hash: caps[1].to_string(),
                extension: caps[2].to_string(),
            })
    }

    /// Content-addressed file name as served by the CDN.
    pub fn file_name(&self) -> String {
        match self {
            AssetReference::Image {
                hash,
                width,
                height,
                format,
            } => format!("{hash}-{width}x{height}.{format}"),
            AssetReference::File { hash, extension } => format!("{hash}.{extension}"),
        }
    }

    pub fn url(&self, cdn_base_url: &str, project_id: &str, dataset: &str) -> String {
        let kind = match self {
            AssetReference::Image { .. } => "images",
            AssetReference::File { .. } => "files",
        };
        format!(
            "{}/{kind}/{project_id}/{dataset}/{}",
            cdn_base_url.trim_end_matches('/'),
            self.file_name()
        )
    }
}

/// A parsed document, reduced to what asset scanning needs.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentNode {
    Scalar,
    Array(Vec<DocumentNode>),
    Object(Vec<(String, DocumentNode)>),
    AssetReference(AssetReference),
}

impl From<&Value> for DocumentNode {
    fn from(value: &Value) -> Self {
        match value {
            Value::Array(items) => DocumentNode::Array(items.iter().map(Into::into).collect()),
            Value::Object(map) => {
                let is_reference = map.get("_type").and_then(Value::as_str) == Some("reference");
                if is_reference
                    && let Some(asset) = map
                        .get("_ref")
                        .and_then(Value::as_str)
                        .and_then(AssetReference::parse)
                {
                    return DocumentNode::AssetReference(asset);
                }
                DocumentNode::Object(
                    map.iter()
                        .map(|(key, value)| (key.clone(), value.into()))
                        .collect(),
                )
            }
            _ => DocumentNode::Scalar,
        }
    }
}

impl DocumentNode {
    pub fn collect_assets(&self, out: &mut BTreeSet<AssetReference>) {
        match self {
            DocumentNode::Scalar => {}
            DocumentNode::Array(items) => items.iter().for_each(|item| item.collect_assets(out)),
            DocumentNode::Object(fields) => fields
                .iter()
                .for_each(|(_, value)| value.collect_assets(out)),
            DocumentNode::AssetReference(asset) => {
                out.insert(asset.clone());
            }
        }
    }
}
