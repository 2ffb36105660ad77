use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// A configured syndication feed to import from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub url: String,
    pub source_name: String,
}

impl FeedSource {
    pub fn new(url: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_name: source_name.into(),
        }
    }

    /// Built-in source registry used when `FEED_SOURCES` is not set.
    pub fn defaults() -> Vec<Self> {
        [
            ("https://jobicy.com/?feed=job_feed", "jobicy"),
            (
                "https://jobicy.com/?feed=job_feed&job_categories=smm&job_types=full-time",
                "jobicy",
            ),
            (
                "https://jobicy.com/?feed=job_feed&job_categories=seller&job_types=full-time&search_region=france",
                "jobicy",
            ),
            ("https://jobicy.com/?feed=job_feed&job_categories=design-multimedia", "jobicy"),
            ("https://jobicy.com/?feed=job_feed&job_categories=data-science", "jobicy"),
            ("https://jobicy.com/?feed=job_feed&job_categories=copywriting", "jobicy"),
            ("https://jobicy.com/?feed=job_feed&job_categories=business", "jobicy"),
            ("https://jobicy.com/?feed=job_feed&job_categories=management", "jobicy"),
            ("https://www.higheredjobs.com/rss/articleFeed.cfm", "higheredjobs"),
        ]
        .into_iter()
        .map(|(url, name)| Self::new(url, name))
        .collect()
    }

    /// Parse a JSON array of sources, rejecting entries that are not http(s) URLs.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        let sources: Vec<Self> = serde_json::from_str(raw).context("invalid feed source JSON")?;
        for source in &sources {
            source.validate()?;
        }
        Ok(sources)
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.url)
            .with_context(|| format!("invalid feed url: {}", self.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("feed url must be http(s): {}", self.url);
        }
        if self.source_name.trim().is_empty() {
            bail!("feed source {} has an empty sourceName", self.url);
        }
        Ok(())
    }

    /// Look up a registered source by its exact url.
    pub fn find<'a>(sources: &'a [Self], url: &str) -> Option<&'a Self> {
        sources.iter().find(|s| s.url == url)
    }
}
