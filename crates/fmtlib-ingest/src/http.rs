//! Catalog downloads.
//!
//! Every request carries the configured connect and overall timeouts. Any
//! failure, including a non-success status, is an error for the caller.

use futures::TryStreamExt;
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use fmtlib_core::{latest_version, Error, Result};

use crate::config::IngestConfig;

/// HTTP client for catalog pages and files.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .user_agent(concat!("fmtlib/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!(subsystem = "ingest", component = "http", url, "GET");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url).await?.text().await?)
    }

    /// Download a whole body. Only for bounded payloads such as archives.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }

    /// Open a body as a buffered byte stream without collecting it.
    pub async fn get_stream(&self, url: &str) -> Result<impl AsyncBufRead + Unpin + Send> {
        let stream = self
            .get(url)
            .await?
            .bytes_stream()
            .map_err(std::io::Error::other);
        Ok(StreamReader::new(Box::pin(stream)))
    }

    /// Links on the page at `url` whose absolute form matches `pattern`.
    pub async fn get_links(&self, url: &str, pattern: &Regex) -> Result<Vec<String>> {
        let html = self.get_text(url).await?;
        let base = Url::parse(url).map_err(|e| Error::InvalidInput(format!("{}: {}", url, e)))?;
        Ok(extract_links(&base, &html, pattern))
    }

    /// The latest link on the page at `url` under natural version ordering.
    pub async fn latest_link(&self, url: &str, pattern: &Regex) -> Result<String> {
        let links = self.get_links(url, pattern).await?;
        let latest = latest_version(links.iter().map(String::as_str))
            .ok_or_else(|| Error::NotFound(format!("No link matching {} on {}", pattern, url)))?
            .to_string();

        debug!(
            subsystem = "ingest",
            component = "http",
            candidates = links.len(),
            link = %latest,
            "Selected latest catalog link"
        );
        Ok(latest)
    }
}

/// Anchor targets in `html`, resolved against `base`, that match `pattern`.
pub fn extract_links(base: &Url, html: &str, pattern: &Regex) -> Vec<String> {
    let doc = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for a in doc.select(&selector) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        let url = url.to_string();
        if pattern.is_match(&url) && !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_filters_and_resolves() {
        let base = Url::parse("https://www.nationalarchives.gov.uk/aboutapps/pronom/").unwrap();
        let pattern = Regex::new(
            r"^https://cdn.nationalarchives.gov.uk/documents/DROID_SignatureFile_V\d*.xml",
        )
        .unwrap();
        let html = r##"
            <ul>
              <li><a href="https://cdn.nationalarchives.gov.uk/documents/DROID_SignatureFile_V99.xml">V99</a></li>
              <li><a href="https://cdn.nationalarchives.gov.uk/documents/DROID_SignatureFile_V120.xml">V120</a></li>
              <li><a href="https://cdn.nationalarchives.gov.uk/documents/container-signature-20240101.xml">container</a></li>
              <li><a href="#top">top</a></li>
              <li><a href="droid.htm">relative</a></li>
              <li><a>no href</a></li>
            </ul>
        "##;

        let links = extract_links(&base, html, &pattern);
        assert_eq!(links.len(), 2);
        assert_eq!(
            latest_version(links.iter().map(String::as_str)),
            Some("https://cdn.nationalarchives.gov.uk/documents/DROID_SignatureFile_V120.xml")
        );
    }

    #[test]
    fn test_extract_links_resolves_relative() {
        let base = Url::parse("http://127.0.0.1:8080/index.htm").unwrap();
        let pattern = Regex::new(r"/files/sig_V\d+\.xml$").unwrap();
        let html = r#"<a href="/files/sig_V2.xml">2</a><a href="files/sig_V10.xml">10</a>"#;

        let links = extract_links(&base, html, &pattern);
        assert_eq!(
            links,
            vec![
                "http://127.0.0.1:8080/files/sig_V2.xml",
                "http://127.0.0.1:8080/files/sig_V10.xml"
            ]
        );
    }

    #[test]
    fn test_extract_links_deduplicates() {
        let base = Url::parse("http://example.com/").unwrap();
        let pattern = Regex::new(r"\.xml$").unwrap();
        let html = r#"<a href="/a.xml">a</a><a href="/a.xml">again</a>"#;
        assert_eq!(extract_links(&base, html, &pattern).len(), 1);
    }
}
