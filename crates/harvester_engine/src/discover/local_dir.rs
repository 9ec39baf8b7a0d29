use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use harvest_logging::harvest_warn;
use harvester_core::{Candidate, CandidateKind, Source};
use url::Url;
use walkdir::WalkDir;

use super::{DiscoveryError, DiscoveryItem, DiscoveryOptions, DiscoveryStream};

/// Walk a local folder of previously downloaded files. The listing is cheap, so
/// it is collected up front on the blocking pool.
pub(super) async fn discover(
    source: Arc<Source>,
    options: DiscoveryOptions,
) -> Result<DiscoveryStream, DiscoveryError> {
    let Some(root) = source.local_path() else {
        return Err(DiscoveryError::LocalRoot {
            path: source.root().to_string(),
            reason: "not a local path".to_string(),
        });
    };
    let display = root.display().to_string();
    let items = tokio::task::spawn_blocking(move || walk(root, source, options))
        .await
        .map_err(|err| DiscoveryError::LocalRoot {
            path: display,
            reason: err.to_string(),
        })??;
    Ok(stream::iter(items).boxed())
}

fn walk(
    root: PathBuf,
    source: Arc<Source>,
    options: DiscoveryOptions,
) -> Result<Vec<DiscoveryItem>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::LocalRoot {
            path: root.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut items = Vec::new();
    for entry in WalkDir::new(&root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let location = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                harvest_warn!("Skipping unreadable entry {}: {}", location, err);
                items.push(DiscoveryItem::LocationFailed {
                    location,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !options.filter.matches_name(&name) {
            continue;
        }
        match Url::from_file_path(entry.path()) {
            Ok(url) => {
                let candidate =
                    Candidate::with_name(url, CandidateKind::LocalFile, name, source.clone())
                        .with_relative_path(relative_path(&root, entry.path()));
                items.push(DiscoveryItem::Candidate(candidate));
            }
            Err(()) => items.push(DiscoveryItem::LocationFailed {
                location: entry.path().display().to_string(),
                reason: "path cannot be expressed as a file URL".to_string(),
            }),
        }
    }
    Ok(items)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
