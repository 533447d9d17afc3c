//! Provenance metadata blocks
//!
//! Event, git, and environment context recorded alongside an archive. These
//! are supplied by the caller; the manifest engine performs no detection of
//! its own. The git block is optional and carried as-is when present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The event that triggered an archive
///
/// Free-form provenance: what milestone this snapshot marks, descriptive
/// notes, and who to ask about it later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Event name (e.g. "PNAS submission", "v1.0 release")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,

    /// Free-form descriptions (repeatable)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,

    /// Contact information (repeatable)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,

    /// Event timestamp (UTC, second precision)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Version-control state of the source tree at freeze time
///
/// Nullable in the manifest; absent means the caller supplied none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitMetadata {
    /// Current branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Current commit hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Primary remote URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Whether the working tree had uncommitted changes
    pub is_dirty: bool,

    /// All configured remotes (name -> URL)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remotes: BTreeMap<String, String>,
}

/// Host and tool context at freeze time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentMetadata {
    /// Hostname of the machine that produced the archive
    pub hostname: String,

    /// User that produced the archive
    pub username: String,

    /// Operating system / architecture identifier
    pub platform: String,

    /// Version of the tool that produced the archive
    pub tool_version: String,
}

/// Source tree identity and the normalization rules applied to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Absolute path of the source root
    pub root: String,

    /// Root member name inside the archive
    pub name: String,

    /// Normalization rules used for relative paths
    pub normalization: NormalizationInfo,
}

/// Path normalization settings recorded for posterity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationInfo {
    /// Path separator used in relative paths
    pub path_separator: String,

    /// Unicode normalization form applied to relative paths
    pub unicode: String,

    /// Entry ordering rule
    pub ordering: String,

    /// Whether version-control directories were excluded
    pub exclude_vcs: bool,
}

impl NormalizationInfo {
    /// The normalization this implementation applies
    pub fn current(exclude_vcs: bool) -> Self {
        NormalizationInfo {
            path_separator: "/".to_string(),
            unicode: "NFC".to_string(),
            ordering: "lexicographic".to_string(),
            exclude_vcs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_metadata_skips_empty_fields() {
        let event = EventMetadata::default();
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_git_metadata_roundtrip() {
        let mut git = GitMetadata {
            branch: Some("main".to_string()),
            commit: Some("abc123".to_string()),
            remote: Some("git@example.com:proj.git".to_string()),
            is_dirty: true,
            remotes: BTreeMap::new(),
        };
        git.remotes
            .insert("origin".to_string(), "git@example.com:proj.git".to_string());

        let json = serde_json::to_string(&git).unwrap();
        let back: GitMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.branch.as_deref(), Some("main"));
        assert!(back.is_dirty);
        assert_eq!(back.remotes.len(), 1);
    }
}
