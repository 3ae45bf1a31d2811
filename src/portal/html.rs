//! Result-page parsing for the courthouse search endpoint.
//!
//! The portal answers a lookup with either raw PDF bytes or an HTML results
//! page. This module owns the HTML side: extracting the record metadata
//! block, the server-reported book/page, and the image download anchors.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

use super::{DocumentMetadata, FetchError};

/// Labeled metadata fields the result table can carry.
///
/// Keys are matched case-insensitively against the first cell of each row.
const METADATA_LABELS: &[&str] = &[
    "grantor",
    "grantee",
    "nature",
    "date",
    "subdivision",
    "section",
    "township",
    "range",
];

#[allow(clippy::expect_used)]
fn book_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Book:\s*(\d+)").expect("static regex"))
}

#[allow(clippy::expect_used)]
fn page_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Page:\s*(\d+)").expect("static regex"))
}

#[allow(clippy::expect_used)]
fn image_href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"pdf-records\.php\?image=(\d+)").expect("static regex"))
}

#[allow(clippy::expect_used)]
fn download_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Download Image \d+").expect("static regex"))
}

/// Parsed view of a courthouse search results page.
#[derive(Debug, Clone)]
pub struct ResultPage {
    /// Metadata extracted from the heading/table block.
    pub metadata: DocumentMetadata,
    /// First `pdf-records.php?image=N` anchor, resolved to an absolute URL.
    pub image_url: Option<Url>,
    /// Captured image id from that anchor.
    pub image_id: Option<u64>,
    /// Every `Download Image N` anchor in document order (multi-page records).
    pub download_links: Vec<Url>,
    /// True when the page states that the search matched nothing.
    pub declares_no_records: bool,
}

/// Returns true when a response body is a PDF.
///
/// The portal is inconsistent about `Content-Type`, so the `%PDF-` magic in
/// the body is accepted on its own.
#[must_use]
pub fn is_pdf_response(content_type: Option<&str>, body: &[u8]) -> bool {
    if let Some(content_type) = content_type {
        if content_type.to_lowercase().contains("pdf") {
            return true;
        }
    }
    body.starts_with(b"%PDF-")
}

/// Parses a search results page.
///
/// # Errors
///
/// Returns [`FetchError::ParseError`] only when the document cannot be
/// interpreted as HTML at all; missing fields degrade to `None` values so
/// the caller decides between `NotFound` and `NoImageAvailable`.
pub fn parse_result_page(html: &str, base_url: &Url) -> Result<ResultPage, FetchError> {
    let document = Html::parse_document(html);
    let text = flatten_text(&document);

    let metadata = parse_metadata(&document, &text);
    let (image_url, image_id) = first_image_anchor(&document, base_url);
    let download_links = download_image_anchors(&document, base_url)?;
    let declares_no_records =
        text.contains("No records found") || text.contains("No documents found");

    Ok(ResultPage {
        metadata,
        image_url,
        image_id,
        download_links,
        declares_no_records,
    })
}

/// Extracts the record metadata block from the result page.
#[allow(clippy::expect_used)]
fn parse_metadata(document: &Html, text: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();

    metadata.actual_book = book_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    metadata.actual_page = page_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    let row_selector = Selector::parse("tr").expect("static selector");
    let cell_selector = Selector::parse("td, th").expect("static selector");

    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 2 {
            continue;
        }

        let label = cells[0].trim_end_matches(':').trim().to_lowercase();
        let value = cells[1].trim().to_string();
        if value.is_empty() || !METADATA_LABELS.contains(&label.as_str()) {
            continue;
        }

        match label.as_str() {
            "grantor" => metadata.grantor = Some(value),
            "grantee" => metadata.grantee = Some(value),
            "nature" => metadata.nature = Some(value),
            "date" => metadata.file_date = Some(value),
            "subdivision" => metadata.subdivision = Some(value),
            "section" => metadata.section = Some(value),
            "township" => metadata.township = Some(value),
            "range" => metadata.range = Some(value),
            _ => {}
        }
    }

    metadata
}

/// Finds the first anchor whose href matches `pdf-records.php?image=N`.
#[allow(clippy::expect_used)]
fn first_image_anchor(document: &Html, base_url: &Url) -> (Option<Url>, Option<u64>) {
    let anchor_selector = Selector::parse("a[href]").expect("static selector");

    for anchor in document.select(&anchor_selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(captures) = image_href_regex().captures(href) {
            let image_id = captures.get(1).and_then(|m| m.as_str().parse().ok());
            let url = base_url.join(href).ok();
            return (url, image_id);
        }
    }

    (None, None)
}

/// Collects every `Download Image N` anchor in document order.
#[allow(clippy::expect_used)]
fn download_image_anchors(document: &Html, base_url: &Url) -> Result<Vec<Url>, FetchError> {
    let anchor_selector = Selector::parse("a[href]").expect("static selector");
    let mut links = Vec::new();

    for anchor in document.select(&anchor_selector) {
        let label: String = anchor.text().collect::<String>();
        if !download_image_regex().is_match(label.trim()) {
            continue;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let url = base_url
            .join(href)
            .map_err(|e| FetchError::parse(format!("bad download link {href}: {e}")))?;
        links.push(url);
    }

    Ok(links)
}

/// Collapses the document to plain text for regex scans.
fn flatten_text(document: &Html) -> String {
    document.root_element().text().collect::<Vec<_>>().join(" ")
}
