//! PDF fetch contract: HEAD first to size-check, body fetch on demand, text
//! capped to a byte budget. Real PDF parsing is a vendor HTTP shim the engine
//! treats as an external collaborator (see `adapter.rs`'s `SourceAdapter` for
//! the same shape applied to search sources) — here we define the trait plus
//! an HTTP implementation good enough to reach `WithFullText` in practice,
//! and a canned fake for tests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default cap on bytes read from a PDF body before giving up on extraction.
pub const DEFAULT_SIZE_CAP_BYTES: usize = 2_000_000;

#[async_trait]
pub trait PdfFetcher: Send + Sync {
    /// Fetch `url` and return best-effort extracted text, or `None` if the
    /// document is unreachable, empty, or too large to be worth it.
    async fn fetch_text(&self, url: &str, size_cap_bytes: usize) -> Result<Option<String>>;
}

/// HEAD-first, size-capped HTTP fetch. Text extraction is a lossy best-effort
/// decode of the response body — a real PDF parser belongs to a later crate.
pub struct HttpPdfFetcher {
    http: reqwest::Client,
}

impl HttpPdfFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPdfFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdfFetcher for HttpPdfFetcher {
    async fn fetch_text(&self, url: &str, size_cap_bytes: usize) -> Result<Option<String>> {
        if let Ok(head) = self.http.head(url).send().await {
            if let Some(len) = head.content_length() {
                // Way past the cap even before decoding; skip the body fetch.
                if len as usize > size_cap_bytes * 4 {
                    return Ok(None);
                }
            }
        }

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| Error::transport_transient(format!("pdf fetch {url}: {err}")))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| Error::transport_transient(format!("pdf body {url}: {err}")))?;
        let capped = &bytes[..bytes.len().min(size_cap_bytes)];
        let text = String::from_utf8_lossy(capped).into_owned();
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}

/// Canned fetcher for tests: returns the configured text for any URL.
pub struct StaticPdfFetcher {
    text: Option<String>,
}

impl StaticPdfFetcher {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()) }
    }

    pub fn empty() -> Self {
        Self { text: None }
    }

    pub fn into_arc(self) -> Arc<dyn PdfFetcher> {
        Arc::new(self)
    }
}

#[async_trait]
impl PdfFetcher for StaticPdfFetcher {
    async fn fetch_text(&self, _url: &str, _size_cap_bytes: usize) -> Result<Option<String>> {
        Ok(self.text.clone())
    }
}
