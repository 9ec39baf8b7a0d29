//! Candidate discovery. Each source kind has its own walker; all of them hand
//! out a lazy stream of [`DiscoveryItem`]s after the root has been read.
mod hosted_tree;
mod local_dir;
mod web_page;

use std::sync::Arc;

use futures_util::stream::BoxStream;
use harvester_core::{Candidate, FileTypeFilter, Source, SourceKind};
use url::Url;

use crate::pacing::{Pacer, Politeness};
use crate::retry::RetryPolicy;
use crate::{FetchError, Fetcher};

pub use hosted_tree::{ContentEntry, EntryType, TreeLister};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Lazily produced discovery output; finishing the stream finishes the walk.
pub type DiscoveryStream = BoxStream<'static, DiscoveryItem>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryItem {
    Candidate(Candidate),
    /// A nested directory or sub-page that could not be read. Siblings continue.
    LocationFailed { location: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read {location}: {source}")]
    Root {
        location: String,
        #[source]
        source: FetchError,
    },
    #[error("cannot read local directory {path}: {reason}")]
    LocalRoot { path: String, reason: String },
    #[error("hosted-tree source {0} has no repository coordinates")]
    MissingRepository(String),
}

impl DiscoveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DiscoveryError::Root { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub filter: FileTypeFilter,
    pub recursive: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            filter: FileTypeFilter::Json,
            recursive: true,
        }
    }
}

/// Enumerates candidates of a [`Source`]. Holds no cache: discovering the same
/// source twice repeats the same requests.
pub struct ContentDiscoverer {
    fetcher: Arc<dyn Fetcher>,
    api_base: Url,
    auth: Option<String>,
    retry: RetryPolicy,
    politeness: Politeness,
    pacer: Arc<Pacer>,
}

impl ContentDiscoverer {
    pub fn new(fetcher: Arc<dyn Fetcher>, api_base: Url) -> Self {
        Self {
            fetcher,
            api_base,
            auth: None,
            retry: RetryPolicy::default(),
            politeness: Politeness::default(),
            pacer: Arc::new(Pacer::new()),
        }
    }

    /// Bearer token for hosted-tree listing calls.
    pub fn with_auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Page pacing; pass the pacer the candidate fetches use so both share one clock.
    pub fn with_politeness(mut self, politeness: Politeness, pacer: Arc<Pacer>) -> Self {
        self.politeness = politeness;
        self.pacer = pacer;
        self
    }

    /// Read the root location and return the lazy remainder of the walk.
    ///
    /// Fails only when the root itself cannot be read.
    pub async fn discover(
        &self,
        source: &Source,
        options: &DiscoveryOptions,
    ) -> Result<DiscoveryStream, DiscoveryError> {
        let source = Arc::new(source.clone());
        match source.kind() {
            SourceKind::WebPage => {
                web_page::discover(
                    self.fetcher.clone(),
                    source,
                    self.politeness.clone(),
                    self.pacer.clone(),
                )
                .await
            }
            SourceKind::HostedTree => {
                let Some(repository) = source.repository().cloned() else {
                    return Err(DiscoveryError::MissingRepository(source.label()));
                };
                let lister = TreeLister::new(
                    self.fetcher.clone(),
                    self.api_base.clone(),
                    repository,
                    source.branch().map(str::to_owned),
                )
                .with_auth(self.auth.clone())
                .with_retry(self.retry.clone());
                hosted_tree::discover(lister, source, *options).await
            }
            SourceKind::LocalDirectory => local_dir::discover(source, *options).await,
        }
    }
}
