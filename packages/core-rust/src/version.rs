//! Immutable version snapshots and the version-label surface syntax.
//!
//! A label is either `"1.<N>"` naming version `N` explicitly, or `"#<tag>"`
//! naming the first version carrying that tag. [`parse_version_label`] is the
//! only parser for this syntax; every operation that accepts a label goes
//! through it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::NodeMetadata;

/// Prefix of an explicit version label.
const EXPLICIT_PREFIX: &str = "1.";
/// Prefix of a tagged version label.
const TAG_PREFIX: &str = "#";

/// Immutable snapshot of a node's metadata.
///
/// Identified by `(node, number)`. Numbers start at 1 and increase
/// monotonically per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub node: Uuid,
    pub number: u32,
    pub tag: Option<String>,
    /// Wall-clock time (millis since epoch) the version was created.
    pub created_at: u64,
    /// Authority that created the version.
    pub creator: String,
    pub metadata: NodeMetadata,
}

impl Version {
    /// Explicit surface label of this version (`"1.<number>"`).
    #[must_use]
    pub fn label(&self) -> String {
        format!("{EXPLICIT_PREFIX}{}", self.number)
    }
}

/// Parsed version label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionLabel {
    /// `"1.<N>"` with `N >= 1`.
    Explicit(u32),
    /// `"#<tag>"`.
    Tagged(String),
}

/// Rejected version label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    #[error("malformed version label '{0}': expected '1.<number>' or '#<tag>'")]
    Malformed(String),
    #[error("version number in label '{0}' must be a positive integer")]
    NotPositive(String),
    #[error("version tag in label '{0}' is empty")]
    EmptyTag(String),
}

/// Parses a version label.
///
/// # Errors
///
/// Returns [`LabelError`] for any shape other than `"1.<positive integer>"`
/// or `"#<non-empty tag>"`.
pub fn parse_version_label(label: &str) -> Result<VersionLabel, LabelError> {
    if let Some(tag) = label.strip_prefix(TAG_PREFIX) {
        if tag.is_empty() {
            return Err(LabelError::EmptyTag(label.to_string()));
        }
        return Ok(VersionLabel::Tagged(tag.to_string()));
    }

    let digits = label
        .strip_prefix(EXPLICIT_PREFIX)
        .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| LabelError::Malformed(label.to_string()))?;

    match digits.parse::<u32>() {
        Ok(0) | Err(_) => Err(LabelError::NotPositive(label.to_string())),
        Ok(n) => Ok(VersionLabel::Explicit(n)),
    }
}

impl VersionLabel {
    /// Finds the version this label designates in `history`.
    ///
    /// Tags resolve to the first match in iteration order.
    #[must_use]
    pub fn find<'a>(&self, history: &'a [Version]) -> Option<&'a Version> {
        match self {
            VersionLabel::Explicit(number) => history.iter().find(|v| v.number == *number),
            VersionLabel::Tagged(tag) => history
                .iter()
                .find(|v| v.tag.as_deref() == Some(tag.as_str())),
        }
    }
}
