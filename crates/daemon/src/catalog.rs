//! Clip catalog and tag index.
//!
//! The catalog file is a JSON array of clip objects whose `file` paths are
//! relative to the media root. Disabled entries and entries whose file is
//! missing never reach the tag index.

use crate::config::MAX_LENGTH_SECS;
use crate::probe::DurationProbe;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for catalog loading. Fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed catalog {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Playback category; decides command shape and clamping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Content,
    Loop,
    Transition,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Content, Category::Loop, Category::Transition];

    /// "loop" wins over "transition"; everything else is content.
    pub fn of(clip: &ClipRecord) -> Self {
        if clip.has_tag("loop") {
            Category::Loop
        } else if clip.has_tag("transition") {
            Category::Transition
        } else {
            Category::Content
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Content => "content",
            Category::Loop => "loop",
            Category::Transition => "transition",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRecord {
    /// Display name; the file name when the catalog has none
    pub name: String,
    /// Resolved path under the media root
    pub path: PathBuf,
    pub tags: Vec<String>,
    /// Start offset in seconds
    pub start: f64,
    /// Length override in seconds, 0 means "use the file duration"
    pub length: f64,
    pub disabled: bool,
    /// File duration probed at load time
    pub file_duration: Option<f64>,
}

impl ClipRecord {
    pub fn new(name: &str, path: impl Into<PathBuf>, tags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            start: 0.0,
            length: 0.0,
            disabled: false,
            file_duration: None,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn category(&self) -> Category {
        Category::of(self)
    }
}

/// Raw catalog JSON structures for parsing.
mod catalog_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub enum Tags {
        One(String),
        Many(Vec<String>),
    }

    impl Default for Tags {
        fn default() -> Self {
            Tags::Many(Vec::new())
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct Entry {
        pub file: String,
        pub name: Option<String>,
        #[serde(default)]
        pub tags: Tags,
        /// Older catalogs carry a single `type` instead of tags
        #[serde(rename = "type")]
        pub kind: Option<String>,
        pub start: Option<f64>,
        pub length: Option<f64>,
        #[serde(default)]
        pub disabled: bool,
    }
}

/// Missing, negative or non-finite values become 0; huge ones are capped.
fn clamp_secs(value: Option<f64>) -> f64 {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map_or(0.0, |v| v.min(MAX_LENGTH_SECS))
}

fn into_record(entry: catalog_json::Entry, media_root: &Path) -> ClipRecord {
    let mut tags = match entry.tags {
        catalog_json::Tags::One(tag) => vec![tag],
        catalog_json::Tags::Many(tags) => tags,
    };
    tags.extend(entry.kind);
    let mut seen = Vec::with_capacity(tags.len());
    tags.retain(|t| {
        if seen.contains(t) {
            false
        } else {
            seen.push(t.clone());
            true
        }
    });

    ClipRecord {
        name: entry.name.unwrap_or_else(|| entry.file.clone()),
        path: media_root.join(&entry.file),
        tags,
        start: clamp_secs(entry.start),
        length: clamp_secs(entry.length),
        disabled: entry.disabled,
        file_duration: None,
    }
}

/// Loaded clips plus the tag index. Read-only after construction.
#[derive(Debug, Default)]
pub struct Catalog {
    clips: Vec<Arc<ClipRecord>>,
    by_tag: HashMap<String, Vec<Arc<ClipRecord>>>,
}

impl Catalog {
    /// Reads and indexes the catalog file, probing each playable clip once.
    pub fn load(
        path: &Path,
        media_root: &Path,
        probe: &dyn DurationProbe,
    ) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::parse(&content, media_root, probe).map_err(|source| {
            CatalogError::Malformed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(
            clips = catalog.len(),
            tags = catalog.by_tag.len(),
            "catalog loaded from {}",
            path.display()
        );
        Ok(catalog)
    }

    /// Parses catalog JSON, dropping disabled and missing-file entries.
    pub fn parse(
        json: &str,
        media_root: &Path,
        probe: &dyn DurationProbe,
    ) -> Result<Self, serde_json::Error> {
        let entries: Vec<catalog_json::Entry> = serde_json::from_str(json)?;

        let records = entries.into_iter().filter_map(|entry| {
            let mut record = into_record(entry, media_root);
            if record.disabled {
                debug!(clip = %record.name, "disabled, removed from catalog");
                return None;
            }
            if !record.path.is_file() {
                debug!(clip = %record.name, path = %record.path.display(), "file not found, removed from catalog");
                return None;
            }
            record.file_duration = probe.duration(&record.path);
            debug!(clip = %record.name, duration = ?record.file_duration, "catalogued");
            Some(record)
        });

        Ok(Self::from_records(records))
    }

    /// Builds the index from already-vetted records.
    pub fn from_records(records: impl IntoIterator<Item = ClipRecord>) -> Self {
        let mut catalog = Catalog::default();
        for record in records {
            if record.disabled {
                continue;
            }
            let record = Arc::new(record);
            for tag in &record.tags {
                catalog
                    .by_tag
                    .entry(tag.clone())
                    .or_default()
                    .push(Arc::clone(&record));
            }
            catalog.clips.push(record);
        }
        catalog
    }

    /// Clips carrying `tag`, in catalog order; empty for unknown tags.
    pub fn lookup(&self, tag: &str) -> &[Arc<ClipRecord>] {
        self.by_tag.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clips(&self) -> &[Arc<ClipRecord>] {
        &self.clips
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.by_tag.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}
