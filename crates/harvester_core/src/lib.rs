//! Harvester core: pure data model and origin parsing. No IO lives here.
mod candidate;
mod document;
mod report;
mod source;

pub use candidate::{
    Candidate, CandidateKind, FileTypeFilter, MediaHint, IMAGE_EXTENSIONS, JSON_EXTENSION,
};
pub use document::WorkflowDocument;
pub use report::{RunError, RunReport, Stage};
pub use source::{
    normalize_source, InvalidSourceError, Repository, Source, SourceKind, SourceLocator,
};
