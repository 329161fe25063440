//! Link discovery on authority listing pages.
//!
//! [`HtmlLinkDiscovery`] downloads an authority's listing page and returns
//! every anchor that points at a publishable file (pdf, xls, xlsx, csv, zip),
//! resolved against the authority's base URL. Order follows the page; a URL
//! linked twice is kept once, with the first title seen.

use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{info, instrument};
use url::Url;

use crate::config::{AuthorityConfig, FetchConfig};
use crate::error::RegwatchError;
use crate::fetch::build_client;
use crate::formats::FileFormat;
use crate::models::LinkCandidate;

#[async_trait]
pub trait LinkDiscovery: Send + Sync {
    async fn discover(&self, authority: &AuthorityConfig)
        -> Result<Vec<LinkCandidate>, RegwatchError>;
}

pub struct HtmlLinkDiscovery {
    client: reqwest::Client,
}

impl HtmlLinkDiscovery {
    pub fn new(config: &FetchConfig) -> Result<Self, RegwatchError> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl LinkDiscovery for HtmlLinkDiscovery {
    #[instrument(skip_all, fields(listing = %authority.listing_url))]
    async fn discover(
        &self,
        authority: &AuthorityConfig,
    ) -> Result<Vec<LinkCandidate>, RegwatchError> {
        let network = |message: String| RegwatchError::Network {
            url: authority.listing_url.clone(),
            message,
        };

        let response = self
            .client
            .get(&authority.listing_url)
            .send()
            .await
            .map_err(|e| network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("HTTP {}", status)));
        }
        let html = response.text().await.map_err(|e| network(e.to_string()))?;

        let links = parse_links(&html, &authority.base_url)?;
        info!(source = %authority.source_label, found = links.len(), "discovered document links");
        Ok(links)
    }
}

/// Extract document links from a listing page.
pub fn parse_links(html: &str, base_url: &str) -> Result<Vec<LinkCandidate>, RegwatchError> {
    let base = Url::parse(base_url).map_err(|e| RegwatchError::Network {
        url: base_url.to_string(),
        message: format!("invalid base URL: {}", e),
    })?;
    let anchors = Selector::parse("a[href]").map_err(|e| RegwatchError::Network {
        url: base_url.to_string(),
        message: format!("bad selector: {}", e),
    })?;

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if !FileFormat::from_name(resolved.path()).is_discoverable() {
            continue;
        }

        let url = resolved.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let text = anchor.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let title = if text.is_empty() {
            last_segment(&resolved)
        } else {
            text
        };

        links.push(LinkCandidate { url, title });
    }

    Ok(links)
}

fn last_segment(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or(url.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
<html><body>
  <a href="#top">Back to top</a>
  <a href="/docs/manual.pdf">AnaCredit
     Manual</a>
  <a href="https://other.example/data/codes.CSV">Codes</a>
  <a href="/about.html">About</a>
  <a href="/docs/pack.zip"></a>
  <a href="/docs/manual.pdf">Manual (again)</a>
  <a href="mailto:info@bcl.lu">Mail</a>
  <a href="templates.xlsx?lang=fr">Templates</a>
</body></html>
"##;

    #[test]
    fn keeps_document_links_in_page_order() {
        let links = parse_links(PAGE, "https://www.bcl.lu/en/").unwrap();
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.bcl.lu/docs/manual.pdf",
                "https://other.example/data/codes.CSV",
                "https://www.bcl.lu/docs/pack.zip",
                "https://www.bcl.lu/en/templates.xlsx?lang=fr",
            ]
        );
    }

    #[test]
    fn titles_fall_back_to_filename() {
        let links = parse_links(PAGE, "https://www.bcl.lu").unwrap();
        assert_eq!(links[0].title, "AnaCredit Manual");
        assert_eq!(links[2].title, "pack.zip");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(parse_links(PAGE, "not a url").is_err());
    }
}
