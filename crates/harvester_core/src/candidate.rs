use std::fmt;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::source::Source;

/// Image suffixes recognized everywhere a file name is classified.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
pub const JSON_EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    /// A direct link to a file (anchor href or image src).
    DirectLink,
    /// A sub-page to be scanned for further links; never fetched as a leaf.
    PageReference,
    /// A file entry of a hosted repository tree.
    TreeEntry,
    /// A file found in a local directory.
    LocalFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaHint {
    Image,
    Json,
    Unknown,
}

impl MediaHint {
    /// Classify a file or URL path by its extension, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return MediaHint::Unknown;
        };
        let ext = ext.to_ascii_lowercase();
        if ext == JSON_EXTENSION {
            MediaHint::Json
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaHint::Image
        } else {
            MediaHint::Unknown
        }
    }
}

/// Which leaf files a run harvests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTypeFilter {
    #[default]
    Json,
    Image,
}

impl FileTypeFilter {
    pub fn accepts(self, media: MediaHint) -> bool {
        matches!(
            (self, media),
            (FileTypeFilter::Json, MediaHint::Json) | (FileTypeFilter::Image, MediaHint::Image)
        )
    }

    pub fn matches_name(self, name: &str) -> bool {
        self.accepts(MediaHint::from_name(name))
    }
}

impl fmt::Display for FileTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileTypeFilter::Json => write!(f, "json"),
            FileTypeFilter::Image => write!(f, "image"),
        }
    }
}

/// One discoverable unit produced during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    location: Url,
    kind: CandidateKind,
    media: MediaHint,
    name: String,
    relative_path: Option<String>,
    parent: Arc<Source>,
}

impl Candidate {
    /// Build a candidate whose name is the last path segment of `location`.
    pub fn new(location: Url, kind: CandidateKind, parent: Arc<Source>) -> Self {
        let name = location
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(percent_decode)
            .unwrap_or_else(|| location.host_str().unwrap_or("index").to_string());
        Self::with_name(location, kind, name, parent)
    }

    /// Build a candidate with an explicit display name (e.g. a tree entry name).
    pub fn with_name(
        location: Url,
        kind: CandidateKind,
        name: impl Into<String>,
        parent: Arc<Source>,
    ) -> Self {
        let name = name.into();
        let media = match kind {
            CandidateKind::PageReference => MediaHint::Unknown,
            _ => MediaHint::from_name(&name),
        };
        Self {
            location,
            kind,
            media,
            name,
            relative_path: None,
            parent,
        }
    }

    /// Record where the candidate sits below its source root, `/`-separated.
    pub fn with_relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    pub fn media(&self) -> MediaHint {
        self.media
    }

    /// Base name including the original extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base name with its final extension stripped.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    pub fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    /// True when the candidate sits directly in its source root under its own name.
    ///
    /// A candidate with no recorded relative path is never top-level.
    pub fn is_top_level(&self) -> bool {
        self.relative_path.as_deref() == Some(self.name.as_str())
    }

    pub fn parent(&self) -> &Source {
        &self.parent
    }

    pub fn is_local(&self) -> bool {
        self.location.scheme() == "file"
    }
}

fn percent_decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
