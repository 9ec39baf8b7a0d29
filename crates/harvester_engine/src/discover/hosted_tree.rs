use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use harvester_core::{Candidate, CandidateKind, Repository, Source};
use serde::Deserialize;
use url::Url;

use super::{DiscoveryError, DiscoveryItem, DiscoveryOptions, DiscoveryStream};
use crate::retry::RetryPolicy;
use crate::{FailureKind, FetchError, FetchRequest, Fetcher, NoopProgressSink};

const GITHUB_JSON: &str = "application/vnd.github+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    /// Symlinks and submodules are not traversed.
    #[serde(other)]
    Other,
}

/// One entry of a contents listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A listing is an array for directories and a single object when the path is a file.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Many(Vec<ContentEntry>),
    One(ContentEntry),
}

/// Client for the hosting API's contents endpoint.
#[derive(Clone)]
pub struct TreeLister {
    fetcher: Arc<dyn Fetcher>,
    api_base: Url,
    repository: Repository,
    branch: Option<String>,
    auth: Option<String>,
    retry: RetryPolicy,
}

impl TreeLister {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        api_base: Url,
        repository: Repository,
        branch: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            api_base,
            repository,
            branch,
            auth: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `{api_base}/repos/{owner}/{repo}/contents/{path}[?ref={branch}]`
    pub fn listing_url(&self, path: &str) -> Result<Url, FetchError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                FetchError::new(FailureKind::InvalidUrl, "api base cannot carry a path")
            })?;
            segments.pop_if_empty().extend([
                "repos",
                self.repository.owner.as_str(),
                self.repository.name.as_str(),
                "contents",
            ]);
            for part in path.split('/').filter(|part| !part.is_empty()) {
                segments.push(part);
            }
        }
        if let Some(branch) = &self.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        Ok(url)
    }

    pub async fn list(&self, path: &str) -> Result<Vec<ContentEntry>, FetchError> {
        let url = self.listing_url(path)?;
        harvest_info!("Fetching repository contents from: {}", url);
        let request = FetchRequest::get(url)
            .bearer(self.auth.as_deref())
            .accept(GITHUB_JSON);
        let fetcher = self.fetcher.as_ref();
        let label = format!("listing of `{}`", display_path(path));
        let result = self
            .retry
            .run(&label, || fetcher.fetch(&request, &NoopProgressSink))
            .await?;

        match serde_json::from_slice::<Listing>(&result.bytes) {
            Ok(Listing::Many(entries)) => Ok(entries),
            Ok(Listing::One(entry)) => Ok(vec![entry]),
            Err(err) => Err(FetchError::new(FailureKind::InvalidJson, err.to_string())),
        }
    }
}

pub(super) async fn discover(
    lister: TreeLister,
    source: Arc<Source>,
    options: DiscoveryOptions,
) -> Result<DiscoveryStream, DiscoveryError> {
    let root = source.subpath().unwrap_or_default().to_string();
    let entries = lister
        .list(&root)
        .await
        .map_err(|err| DiscoveryError::Root {
            location: source.label(),
            source: err,
        })?;

    let mut walk = TreeWalk {
        lister,
        source,
        options,
        ready: VecDeque::new(),
        pending: VecDeque::new(),
        visited: HashSet::from([root.clone()]),
        root: root.clone(),
    };
    walk.absorb(&root, entries);

    Ok(stream::unfold(walk, |mut walk| async move {
        let item = walk.next_item().await?;
        Some((item, walk))
    })
    .boxed())
}

/// Work-queue traversal: directories wait in `pending`, leaves in `ready`.
struct TreeWalk {
    lister: TreeLister,
    source: Arc<Source>,
    options: DiscoveryOptions,
    ready: VecDeque<DiscoveryItem>,
    pending: VecDeque<String>,
    visited: HashSet<String>,
    root: String,
}

impl TreeWalk {
    async fn next_item(&mut self) -> Option<DiscoveryItem> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let dir = self.pending.pop_front()?;
            harvest_info!("Processing subdirectory: {}", dir);
            match self.lister.list(&dir).await {
                Ok(entries) => self.absorb(&dir, entries),
                Err(err) => {
                    harvest_warn!("Skipping subdirectory {}: {}", dir, err);
                    return Some(DiscoveryItem::LocationFailed {
                        location: dir,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    fn absorb(&mut self, dir: &str, entries: Vec<ContentEntry>) {
        for entry in entries {
            let entry_path = entry
                .path
                .clone()
                .unwrap_or_else(|| join_path(dir, &entry.name));
            match entry.entry_type {
                EntryType::File => {
                    if !self.options.filter.matches_name(&entry.name) {
                        continue;
                    }
                    let location = entry
                        .download_url
                        .as_deref()
                        .and_then(|raw| Url::parse(raw).ok());
                    let item = match location {
                        Some(url) => DiscoveryItem::Candidate(
                            Candidate::with_name(
                                url,
                                CandidateKind::TreeEntry,
                                entry.name,
                                self.source.clone(),
                            )
                            .with_relative_path(relative_to(&self.root, &entry_path)),
                        ),
                        None => DiscoveryItem::LocationFailed {
                            location: entry_path,
                            reason: "entry has no usable download URL".to_string(),
                        },
                    };
                    self.ready.push_back(item);
                }
                EntryType::Dir if self.options.recursive => {
                    if self.visited.insert(entry_path.clone()) {
                        self.pending.push_back(entry_path);
                    }
                }
                EntryType::Dir | EntryType::Other => {
                    harvest_debug!("Not descending into {}", entry_path);
                }
            }
        }
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// `path` below `root`; unchanged when it does not sit under `root`.
fn relative_to(root: &str, path: &str) -> String {
    let root = root.trim_matches('/');
    let path = path.trim_start_matches('/');
    if root.is_empty() {
        return path.to_string();
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
        .to_string()
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
