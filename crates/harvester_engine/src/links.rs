use scraper::{Html, Selector};
use url::Url;

const DEFAULT_MAX_LINKS: usize = 5_000;

/// Hyperlink targets and image sources found on one page, resolved to absolute URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    pub anchors: Vec<Url>,
    pub images: Vec<Url>,
}

pub struct LinkScanner {
    max_links_per_page: usize,
}

impl LinkScanner {
    pub fn new() -> Self {
        Self::with_max_links(DEFAULT_MAX_LINKS)
    }

    pub fn with_max_links(max_links_per_page: usize) -> Self {
        Self { max_links_per_page }
    }

    pub fn scan(&self, html: &str, base_url: &Url) -> PageLinks {
        let document = Html::parse_document(html);
        PageLinks {
            anchors: self.collect(&document, "a[href]", "href", base_url),
            images: self.collect(&document, "img[src]", "src", base_url),
        }
    }

    fn collect(&self, document: &Html, selector: &str, attr: &str, base: &Url) -> Vec<Url> {
        let Ok(selector) = Selector::parse(selector) else {
            return Vec::new();
        };
        document
            .select(&selector)
            .filter_map(|element| element.value().attr(attr))
            .filter_map(|raw| resolve_url(raw, base))
            .take(self.max_links_per_page)
            .collect()
    }
}

impl Default for LinkScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve an href/src against the page URL. Fragment-only, query-only and
/// `javascript:` references yield `None`; fragments are dropped from the result.
pub fn resolve_url(reference: &str, base: &Url) -> Option<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#') || lower.starts_with('?') || lower.starts_with("javascript:") {
        return None;
    }
    let mut url = Url::parse(trimmed).or_else(|_| base.join(trimmed)).ok()?;
    url.set_fragment(None);
    Some(url)
}

/// True when the URL path ends in one of the recognized image extensions.
pub fn is_image_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    harvester_core::IMAGE_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{ext}")))
}
