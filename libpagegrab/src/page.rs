use crate::chain::VisitedSet;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
    static ref IMG_SELECTOR: Selector = Selector::parse("img[src]").unwrap();
    static ref PARAGRAPH_SELECTOR: Selector = Selector::parse("p").unwrap();
    static ref ANCHOR_SELECTOR: Selector = Selector::parse("a[href]").unwrap();
}

/// Everything the chain needs from one page, extracted up front so the parsed
/// document never lives across an await point.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PageScan {
    pub title: Option<String>,
    /// `src` of every image, in document order
    pub images: Vec<String>,
    /// href of the first anchor inside a paragraph carrying the next marker
    pub marked_next: Option<String>,
    /// Every anchor href, in document order
    pub anchors: Vec<String>,
}

#[tracing::instrument(skip(html))]
pub(crate) fn scan_page(html: &str, next_marker: &str) -> PageScan {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let images = document
        .select(&IMG_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .map(str::to_string)
        .collect::<Vec<_>>();

    let marked_next = document
        .select(&PARAGRAPH_SELECTOR)
        .filter(|p| p.text().collect::<String>().contains(next_marker))
        .find_map(|p| {
            p.select(&ANCHOR_SELECTOR)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        });

    let anchors = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect::<Vec<_>>();

    tracing::debug!(
        "Found {} images and {} anchors, title {:?}",
        images.len(),
        anchors.len(),
        title
    );
    PageScan {
        title,
        images,
        marked_next,
        anchors,
    }
}

impl PageScan {
    /// Picks the page that follows this one. A marked "next" paragraph wins
    /// even when it points back to a visited page; otherwise the first
    /// site-relative anchor not yet visited.
    pub(crate) fn next_link(&self, origin: &str, visited: &VisitedSet) -> Option<Url> {
        if let Some(href) = &self.marked_next {
            match Url::parse(&resolve_reference(origin, href)) {
                Ok(url) => return Some(url),
                Err(e) => tracing::warn!("Ignoring unparsable next link {}\nError : {}", href, e),
            }
        }

        self.anchors
            .iter()
            .filter(|href| href.starts_with('/'))
            .filter_map(|href| Url::parse(&format!("{origin}{href}")).ok())
            .find(|url| !visited.contains(url))
    }
}

/// Resolves a reference found on a page against the page's scheme and host.
/// Absolute http(s) references are returned unchanged.
pub(crate) fn resolve_reference(origin: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else if reference.starts_with('/') {
        format!("{origin}{reference}")
    } else {
        format!("{origin}/{reference}")
    }
}

/// Final fragment of the reference split on `/` or `.`.
pub(crate) fn image_extension(reference: &str) -> &str {
    reference.rsplit(['/', '.']).next().unwrap_or(reference)
}

/// Digits needed to print `count`, so padded names sort in discovery order.
pub(crate) fn name_width(count: usize) -> usize {
    count.to_string().len()
}

pub(crate) fn image_file_name(index: usize, width: usize, reference: &str) -> String {
    format!(
        "{:0width$}.{}",
        index + 1,
        image_extension(reference),
        width = width
    )
}

/// Leading token of a title, cut at the first hyphen or whitespace.
pub(crate) fn leading_token(title: &str) -> &str {
    title
        .split(|c: char| c == '-' || c.is_whitespace())
        .next()
        .unwrap_or("")
}

/// Makes a title usable as a single directory name. Titles that would still
/// resolve to the current or parent directory give `None`.
pub(crate) fn path_component(title: &str) -> Option<String> {
    let name = title.trim().replace(['/', '\\'], "_");
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}
