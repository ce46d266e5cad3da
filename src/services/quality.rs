//! Quality table
//!
//! Ordered reference list of quality labels (e.g. "Bluray-1080p") mapped to a
//! preference rank and a physical-media flag. Lower rank means better quality.
//! Used by:
//! - FilenameParser to validate the bracketed quality label
//! - Reconciler to order competing files of the same partition

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One row of the quality table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    pub label: String,
    /// Lower is better
    #[serde(rename = "rank")]
    pub preference_rank: u32,
    #[serde(rename = "physical")]
    pub is_physical_media: bool,
}

/// Result of comparing two quality labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOrdering {
    /// Left side has a numerically lower rank
    Better,
    /// Left side has a numerically higher rank
    Worse,
    Equal,
}

impl std::fmt::Display for QualityOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityOrdering::Better => write!(f, "better"),
            QualityOrdering::Worse => write!(f, "worse"),
            QualityOrdering::Equal => write!(f, "equal"),
        }
    }
}

/// Built-in table, best first: (label, physical)
const DEFAULT_LEVELS: &[(&str, bool)] = &[
    ("Remux-2160p", true),
    ("Bluray-2160p", true),
    ("WEBDL-2160p", false),
    ("WEBRip-2160p", false),
    ("HDTV-2160p", false),
    ("Remux-1080p", true),
    ("Bluray-1080p", true),
    ("WEBDL-1080p", false),
    ("WEBRip-1080p", false),
    ("HDTV-1080p", false),
    ("Bluray-720p", true),
    ("WEBDL-720p", false),
    ("WEBRip-720p", false),
    ("HDTV-720p", false),
    ("Bluray-576p", true),
    ("Bluray-480p", true),
    ("DVD", true),
    ("WEBDL-480p", false),
    ("WEBRip-480p", false),
    ("SDTV", false),
];

/// Immutable quality reference set, loaded once at startup
#[derive(Debug, Clone)]
pub struct QualityTable {
    levels: Vec<QualityLevel>,
    by_label: HashMap<String, usize>,
}

impl QualityTable {
    /// Build a table from explicit levels. Labels must be unique.
    pub fn new(mut levels: Vec<QualityLevel>) -> Result<Self> {
        if levels.is_empty() {
            bail!("Quality table is empty");
        }
        levels.sort_by_key(|l| l.preference_rank);

        let mut by_label = HashMap::with_capacity(levels.len());
        for (idx, level) in levels.iter().enumerate() {
            if level.label.trim().is_empty() {
                bail!("Quality table contains an empty label");
            }
            if by_label.insert(level.label.clone(), idx).is_some() {
                bail!("Duplicate quality label in table: {}", level.label);
            }
        }

        Ok(Self { levels, by_label })
    }

    /// Load a table from a JSON array of `{label, rank, physical}` objects
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read quality table {}", path.display()))?;
        let levels: Vec<QualityLevel> =
            serde_json::from_str(&raw).context("Failed to parse quality table JSON")?;
        debug!(path = %path.display(), count = levels.len(), "Loaded quality table");
        Self::new(levels)
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.levels
    }

    pub fn get(&self, label: &str) -> Option<&QualityLevel> {
        self.by_label.get(label).map(|&idx| &self.levels[idx])
    }

    pub fn contains(&self, label: &str) -> bool {
        self.by_label.contains_key(label)
    }

    pub fn rank(&self, label: &str) -> Option<u32> {
        self.get(label).map(|l| l.preference_rank)
    }

    pub fn is_physical(&self, label: &str) -> Option<bool> {
        self.get(label).map(|l| l.is_physical_media)
    }
}

impl Default for QualityTable {
    fn default() -> Self {
        let levels: Vec<QualityLevel> = DEFAULT_LEVELS
            .iter()
            .enumerate()
            .map(|(idx, (label, physical))| QualityLevel {
                label: (*label).to_string(),
                preference_rank: idx as u32 + 1,
                is_physical_media: *physical,
            })
            .collect();
        let by_label = levels
            .iter()
            .enumerate()
            .map(|(idx, l)| (l.label.clone(), idx))
            .collect();
        Self { levels, by_label }
    }
}

/// Lower rank wins
pub fn compare_ranks(a: u32, b: u32) -> QualityOrdering {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => QualityOrdering::Better,
        std::cmp::Ordering::Greater => QualityOrdering::Worse,
        std::cmp::Ordering::Equal => QualityOrdering::Equal,
    }
}
