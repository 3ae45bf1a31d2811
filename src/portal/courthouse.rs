//! HTTP client for the courthouse search endpoint (Historical and Mid).
//!
//! Both portals live on the same host behind
//! `drupal-deed-record-lookup.php`; they differ only in which book range
//! they serve and how multi-page records come back. A lookup is a
//! form-style GET whose response is either raw PDF bytes or an HTML results
//! page carrying metadata and image download anchors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use super::html::{is_pdf_response, parse_result_page, ResultPage};
use super::{
    merge_pdfs, DocumentLookup, DocumentMetadata, FetchError, FetchResult, LookupKey, Portal,
    PortalClient,
};

/// Search endpoint filename under the portal base URL.
const LOOKUP_ENDPOINT: &str = "drupal-deed-record-lookup.php";

/// The literal search trigger the endpoint requires.
const SEARCH_TRIGGER: &str = "Submit Query";

/// Client for the Historical and Mid portals.
///
/// One instance serves one portal tag; construct two sharing the same base
/// URL to cover both ranges. The underlying `reqwest::Client` pools
/// connections, so cloning per worker is cheap.
#[derive(Debug, Clone)]
pub struct CourthouseClient {
    portal: Portal,
    client: Client,
    base_url: Url,
    search_url: Url,
}

impl CourthouseClient {
    /// Creates a client for the given portal.
    ///
    /// # Arguments
    ///
    /// * `portal` - Which range this client is registered for
    /// * `base_url` - Directory URL the lookup endpoint and image links hang off
    /// * `user_agent` - Sent on every request; the server rejects empty UA
    /// * `timeout` - Per-request deadline
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidResponse`] when the base URL is
    /// malformed or the HTTP client cannot be constructed.
    pub fn new(
        portal: Portal,
        base_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        // Trailing slash matters: Url::join treats the last segment as a
        // file otherwise and relative image links would resolve wrong.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| FetchError::invalid_response(format!("bad portal base URL: {e}")))?;
        let search_url = base_url
            .join(LOOKUP_ENDPOINT)
            .map_err(|e| FetchError::invalid_response(format!("bad lookup endpoint: {e}")))?;

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(|e| {
                FetchError::invalid_response(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            portal,
            client,
            base_url,
            search_url,
        })
    }

    /// Builds the full form-style parameter set the endpoint expects.
    ///
    /// Every key is always present; unused criteria are sent as empty
    /// strings exactly as the portal's own search form does.
    fn search_params(lookup: &DocumentLookup) -> Vec<(&'static str, String)> {
        let (book, page, instrument) = match lookup.key {
            LookupKey::Instrument(instrument) => (String::new(), String::new(), instrument.to_string()),
            LookupKey::BookPage { book, page } => (book.to_string(), page.to_string(), String::new()),
        };

        vec![
            ("grantor", String::new()),
            ("doc_type", lookup.doc_code.clone()),
            ("book", book),
            ("bpage", page),
            ("month", String::new()),
            ("day", String::new()),
            ("year", String::new()),
            ("thru_month", String::new()),
            ("thru_day", String::new()),
            ("thru_year", String::new()),
            ("section", String::new()),
            ("township", String::new()),
            ("range", String::new()),
            ("code", String::new()),
            ("lot", String::new()),
            ("iyear", String::new()),
            ("instrument", instrument),
            ("do_search", SEARCH_TRIGGER.to_string()),
        ]
    }

    /// Fetches one image URL and verifies the response is a PDF.
    async fn fetch_pdf(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 404 {
                return Err(FetchError::not_found(format!("image URL returned 404: {url}")));
            }
            return Err(FetchError::invalid_response(format!(
                "image URL returned HTTP {status}: {url}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;

        if !is_pdf_response(content_type.as_deref(), &body) {
            return Err(FetchError::invalid_response(format!(
                "expected PDF from {url}, got {}",
                content_type.as_deref().unwrap_or("unknown content type")
            )));
        }

        Ok(body.to_vec())
    }

    /// Resolves a parsed results page into PDF bytes.
    ///
    /// Mid-range book/page lookups can answer with one image per recorded
    /// page; those are fetched in document order and stitched. Everything
    /// else downloads the first `pdf-records.php?image=` anchor.
    async fn download_from_results(
        &self,
        lookup: &DocumentLookup,
        page: &ResultPage,
    ) -> Result<Vec<u8>, FetchError> {
        let stitchable = self.portal == Portal::Mid
            && matches!(lookup.key, LookupKey::BookPage { .. })
            && page.download_links.len() > 1;

        if stitchable {
            debug!(
                images = page.download_links.len(),
                "stitching multi-image record"
            );
            let mut parts = Vec::with_capacity(page.download_links.len());
            for link in &page.download_links {
                parts.push(self.fetch_pdf(link).await?);
            }
            return merge_pdfs(&parts);
        }

        let image_url = page
            .image_url
            .as_ref()
            .or_else(|| page.download_links.first())
            .ok_or_else(|| {
                // Caller guarantees at least one link before dispatching here.
                FetchError::parse("no image link on results page".to_string())
            })?;

        self.fetch_pdf(image_url).await
    }
}

#[async_trait]
impl PortalClient for CourthouseClient {
    fn portal(&self) -> Portal {
        self.portal
    }

    #[instrument(skip(self), fields(portal = %self.portal))]
    async fn fetch(&self, lookup: &DocumentLookup) -> Result<FetchResult, FetchError> {
        let params = Self::search_params(lookup);
        let response = self
            .client
            .get(self.search_url.clone())
            .query(&params)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(self.search_url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 404 {
                return Err(FetchError::not_found(format!(
                    "lookup returned 404 for {lookup:?}"
                )));
            }
            return Err(FetchError::invalid_response(format!(
                "lookup returned HTTP {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(self.search_url.as_str(), e))?;

        // Some lookups skip the results page entirely and answer with the
        // document itself.
        if is_pdf_response(content_type.as_deref(), &body) {
            debug!(bytes = body.len(), "direct PDF response");
            return Ok(FetchResult {
                metadata: DocumentMetadata::default(),
                pdf_bytes: body.to_vec(),
            });
        }

        let html = String::from_utf8_lossy(&body);
        let page = parse_result_page(&html, &self.base_url)?;

        if page.image_url.is_none() && page.download_links.is_empty() {
            if page.declares_no_records {
                return Err(FetchError::not_found(format!(
                    "portal reports no records for {lookup:?}"
                )));
            }
            warn!(?lookup, "results page carried metadata but no download link");
            return Err(FetchError::no_image(
                "results page has no image anchor",
                page.metadata,
            ));
        }

        let pdf_bytes = self.download_from_results(lookup, &page).await?;

        Ok(FetchResult {
            metadata: page.metadata,
            pdf_bytes,
        })
    }
}
