//! Typed state-tree patches.
//!
//! A patch is a path-scoped assignment against the replicated state tree:
//! `.streams.<address>["segment0.ts"] = {"Content-Type":"link",...}`.
//! Patches are built as structured values and only rendered to protocol
//! text at the peer boundary, so filenames never get spliced into JSON by
//! string concatenation.

use crate::error::SyncError;
use crate::types::ContentDigest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Path of a patch: dotted segments followed by one quoted key.
///
/// Renders as `.seg0.seg1["key"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPath {
    pub segments: Vec<String>,
    pub key: String,
}

impl PatchPath {
    pub fn new(segments: Vec<String>, key: impl Into<String>) -> Self {
        Self {
            segments,
            key: key.into(),
        }
    }

    /// Validate path syntax.
    ///
    /// Segments must be non-empty and restricted to `[A-Za-z0-9_-]`; the
    /// quoted key must be non-empty and free of quotes, backslashes, and
    /// control characters.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.segments.is_empty() {
            return Err(SyncError::Validation(
                "Patch path must have at least one segment".to_string(),
            ));
        }
        for segment in &self.segments {
            if segment.is_empty() {
                return Err(SyncError::Validation(
                    "Patch path segment must not be empty".to_string(),
                ));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(SyncError::Validation(format!(
                    "Invalid patch path segment: {:?}",
                    segment
                )));
            }
        }
        if self.key.is_empty() {
            return Err(SyncError::Validation(
                "Patch key must not be empty".to_string(),
            ));
        }
        if self
            .key
            .chars()
            .any(|c| c == '"' || c == '\\' || c.is_control())
        {
            return Err(SyncError::Validation(format!(
                "Invalid patch key: {:?}",
                self.key
            )));
        }
        Ok(())
    }

    /// All path elements in order, the quoted key last. Used by the state
    /// reader to walk its tree.
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.key.as_str()))
    }
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, ".{}", segment)?;
        }
        write!(f, "[\"{}\"]", self.key)
    }
}

/// The value assigned by a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatchValue {
    /// A plain JSON value.
    Json(serde_json::Value),
    /// A typed link to a content-addressed blob.
    BlobLink(ContentDigest),
}

impl PatchValue {
    /// The JSON value as it appears in the state tree.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PatchValue::Json(value) => value.clone(),
            PatchValue::BlobLink(digest) => json!({
                "Content-Type": "link",
                "value": format!("ref:{}:{}", digest.algorithm, digest.to_hex()),
            }),
        }
    }
}

/// A single path-scoped assignment against the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub path: PatchPath,
    pub value: PatchValue,
}

impl Patch {
    pub fn new(path: PatchPath, value: PatchValue) -> Self {
        Self { path, value }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        self.path.validate()
    }

    /// Render to the peer's patch-line format. Only called at the protocol
    /// boundary; everything upstream handles the typed form.
    pub fn to_line(&self) -> String {
        format!("{} = {}", self.path, self.value.to_json())
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}
