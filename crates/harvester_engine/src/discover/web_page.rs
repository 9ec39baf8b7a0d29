use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use harvest_logging::{harvest_info, harvest_warn};
use harvester_core::{Candidate, CandidateKind, Source};
use url::Url;

use super::{DiscoveryError, DiscoveryItem, DiscoveryStream};
use crate::decode::decode_text;
use crate::links::{is_image_url, LinkScanner};
use crate::pacing::{Pacer, Politeness};
use crate::{FetchError, FetchRequest, Fetcher, NoopProgressSink};

/// Scan the root page, then visit each same-origin sub-page exactly once.
///
/// Sub-pages are not followed any further: links found on a sub-page only
/// contribute images, never more pages.
pub(super) async fn discover(
    fetcher: Arc<dyn Fetcher>,
    source: Arc<Source>,
    politeness: Politeness,
    pacer: Arc<Pacer>,
) -> Result<DiscoveryStream, DiscoveryError> {
    let root = source.root().clone();
    pacer.wait(politeness.page_delay).await;
    let (base, html) = fetch_page(fetcher.as_ref(), &root)
        .await
        .map_err(|err| DiscoveryError::Root {
            location: root.to_string(),
            source: err,
        })?;

    let mut walk = PageWalk {
        fetcher,
        source,
        politeness,
        pacer,
        scanner: LinkScanner::new(),
        ready: VecDeque::new(),
        pending_pages: VecDeque::new(),
        seen_images: HashSet::new(),
        root_base: base.clone(),
    };

    let mut seen_pages = HashSet::from([root.to_string(), base.to_string()]);
    let links = walk.scanner.scan(&html, &base);
    for anchor in links.anchors {
        if is_image_url(&anchor) {
            walk.push_image(anchor);
        } else if anchor.origin() == base.origin() && seen_pages.insert(anchor.to_string()) {
            walk.pending_pages.push_back(Candidate::new(
                anchor,
                CandidateKind::PageReference,
                walk.source.clone(),
            ));
        }
    }
    harvest_info!(
        "Root page {} links {} images and {} sub-pages",
        root,
        walk.ready.len(),
        walk.pending_pages.len()
    );

    Ok(stream::unfold(walk, |mut walk| async move {
        let item = walk.next_item().await?;
        Some((item, walk))
    })
    .boxed())
}

struct PageWalk {
    fetcher: Arc<dyn Fetcher>,
    source: Arc<Source>,
    politeness: Politeness,
    pacer: Arc<Pacer>,
    scanner: LinkScanner,
    ready: VecDeque<Candidate>,
    pending_pages: VecDeque<Candidate>,
    /// Exact-string de-duplication across root and sub-pages.
    seen_images: HashSet<String>,
    /// Post-redirect root page; image paths are recorded relative to it.
    root_base: Url,
}

impl PageWalk {
    async fn next_item(&mut self) -> Option<DiscoveryItem> {
        loop {
            if let Some(candidate) = self.ready.pop_front() {
                return Some(DiscoveryItem::Candidate(candidate));
            }
            let page = self.pending_pages.pop_front()?;
            self.pacer.wait(self.politeness.subpage_delay).await;
            match fetch_page(self.fetcher.as_ref(), page.location()).await {
                Ok((base, html)) => {
                    let links = self.scanner.scan(&html, &base);
                    for image in links.images {
                        self.push_image(image);
                    }
                    for anchor in links.anchors {
                        if is_image_url(&anchor) {
                            self.push_image(anchor);
                        }
                    }
                }
                Err(err) => {
                    harvest_warn!("Error processing page {}: {}", page.location(), err);
                    return Some(DiscoveryItem::LocationFailed {
                        location: page.location().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    fn push_image(&mut self, url: Url) {
        if self.seen_images.insert(url.to_string()) {
            let relative = self
                .root_base
                .make_relative(&url)
                .unwrap_or_else(|| url.to_string());
            self.ready.push_back(
                Candidate::new(url, CandidateKind::DirectLink, self.source.clone())
                    .with_relative_path(relative),
            );
        }
    }
}

/// Fetch a page and decode it; returns the post-redirect URL for link resolution.
async fn fetch_page(fetcher: &dyn Fetcher, url: &Url) -> Result<(Url, String), FetchError> {
    let request = FetchRequest::get(url.clone()).accept("text/html,application/xhtml+xml");
    let result = fetcher.fetch(&request, &NoopProgressSink).await?;
    let html = match decode_text(&result.bytes, result.content_type.as_deref()) {
        Ok(decoded) => decoded.text,
        Err(_) => String::from_utf8_lossy(&result.bytes).into_owned(),
    };
    Ok((result.final_url, html))
}
