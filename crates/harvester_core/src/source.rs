use std::path::{Path, PathBuf};

use harvest_logging::harvest_warn;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

const HOSTED_TREE_HOSTS: &[&str] = &["github.com", "www.github.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    WebPage,
    HostedTree,
    LocalDirectory,
}

/// Owner/name pair of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

/// Normalized origin descriptor. Immutable once built by [`SourceLocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    kind: SourceKind,
    root: Url,
    repository: Option<Repository>,
    subpath: Option<String>,
    branch: Option<String>,
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Repository coordinates; only present for hosted-tree sources.
    pub fn repository(&self) -> Option<&Repository> {
        self.repository.as_ref()
    }

    pub fn subpath(&self) -> Option<&str> {
        self.subpath.as_deref()
    }

    /// Branch or ref parsed from the origin. `None` means the host's default branch.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Filesystem root of a local-directory source.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.kind {
            SourceKind::LocalDirectory => self.root.to_file_path().ok(),
            _ => None,
        }
    }

    /// Short human-readable label used in logs and reports.
    pub fn label(&self) -> String {
        match (&self.repository, self.kind) {
            (Some(repo), SourceKind::HostedTree) => {
                let mut label = format!("{}/{}", repo.owner, repo.name);
                if let Some(branch) = &self.branch {
                    label.push('@');
                    label.push_str(branch);
                }
                if let Some(subpath) = &self.subpath {
                    label.push('/');
                    label.push_str(subpath);
                }
                label
            }
            _ => self.root.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSourceError {
    #[error("origin reference is empty")]
    Empty,
    #[error("unsupported scheme `{scheme}` in origin {input}")]
    UnsupportedScheme { input: String, scheme: String },
    #[error("repository reference {0} needs both an owner and a repository name")]
    MissingRepository(String),
    #[error("malformed origin {input}: {reason}")]
    Malformed { input: String, reason: String },
}

/// Pure parser from raw user input to a [`Source`].
///
/// Relative filesystem paths are resolved against `working_dir`.
#[derive(Debug, Clone)]
pub struct SourceLocator {
    working_dir: PathBuf,
}

impl SourceLocator {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn normalize(&self, raw: &str) -> Result<Source, InvalidSourceError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(InvalidSourceError::Empty);
        }

        if looks_like_bare_host(input) {
            return self.normalize(&format!("https://{input}"));
        }

        match Url::parse(input) {
            // Single-letter schemes are Windows drive letters, not URLs.
            Ok(url) if url.scheme().len() == 1 => self.local(input, Path::new(input)),
            Ok(url) => match url.scheme() {
                "http" | "https" => {
                    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
                    if HOSTED_TREE_HOSTS.contains(&host.as_str()) {
                        hosted_tree(input, url)
                    } else {
                        Ok(web_page(url))
                    }
                }
                "file" => {
                    let path = url.to_file_path().map_err(|_| InvalidSourceError::Malformed {
                        input: input.to_string(),
                        reason: "file URL has no local path".into(),
                    })?;
                    self.local(input, &path)
                }
                other => Err(InvalidSourceError::UnsupportedScheme {
                    input: input.to_string(),
                    scheme: other.to_string(),
                }),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => self.local(input, Path::new(input)),
            Err(err) => Err(InvalidSourceError::Malformed {
                input: input.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn local(&self, input: &str, path: &Path) -> Result<Source, InvalidSourceError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        };
        let root =
            Url::from_directory_path(&absolute).map_err(|_| InvalidSourceError::Malformed {
                input: input.to_string(),
                reason: format!("{} is not an absolute path", absolute.display()),
            })?;
        Ok(Source {
            kind: SourceKind::LocalDirectory,
            root,
            repository: None,
            subpath: None,
            branch: None,
        })
    }
}

impl Default for SourceLocator {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }
}

/// Normalize with a locator rooted at the current working directory.
pub fn normalize_source(raw: &str) -> Result<Source, InvalidSourceError> {
    SourceLocator::default().normalize(raw)
}

fn looks_like_bare_host(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    HOSTED_TREE_HOSTS
        .iter()
        .any(|host| lower.starts_with(&format!("{host}/")))
}

fn web_page(mut url: Url) -> Source {
    url.set_fragment(None);
    Source {
        kind: SourceKind::WebPage,
        root: url,
        repository: None,
        subpath: None,
        branch: None,
    }
}

fn hosted_tree(input: &str, url: Url) -> Result<Source, InvalidSourceError> {
    let decoded: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

    let (owner, name) = match segments.as_slice() {
        [owner, name, ..] => (owner.to_string(), name.trim_end_matches(".git").to_string()),
        _ => return Err(InvalidSourceError::MissingRepository(input.to_string())),
    };
    if name.is_empty() {
        return Err(InvalidSourceError::MissingRepository(input.to_string()));
    }

    let rest = &segments[2..];
    let (branch, subpath) = match rest {
        [] => (None, None),
        ["tree", branch, path @ ..] => {
            let subpath = if path.is_empty() {
                None
            } else {
                Some(path.join("/"))
            };
            (Some(branch.to_string()), subpath)
        }
        extra => {
            harvest_warn!(
                "Ignoring unrecognized path segments {:?} after {}/{} in {}",
                extra,
                owner,
                name,
                input
            );
            (None, None)
        }
    };

    let root = Url::parse(&format!("https://github.com/{owner}/{name}")).map_err(|err| {
        InvalidSourceError::Malformed {
            input: input.to_string(),
            reason: err.to_string(),
        }
    })?;

    Ok(Source {
        kind: SourceKind::HostedTree,
        root,
        repository: Some(Repository { owner, name }),
        subpath,
        branch,
    })
}
