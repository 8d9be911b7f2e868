//! Bing Web Search v7 provider.
//!
//! Calls `GET https://api.bing.microsoft.com/v7.0/search` with the key in
//! the `Ocp-Apim-Subscription-Key` header. Bing has no answer field, so
//! `summary` is always `None`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{decode, SearchProvider, SearchResponse, SearchResult};

const BING_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingApiResponse {
    #[serde(default)]
    web_pages: Option<BingWebPages>,
}

#[derive(Deserialize)]
struct BingWebPages {
    #[serde(default)]
    value: Vec<BingWebPage>,
}

#[derive(Deserialize)]
struct BingWebPage {
    name: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

impl From<BingApiResponse> for SearchResponse {
    fn from(bing: BingApiResponse) -> Self {
        SearchResponse {
            summary: None,
            results: bing
                .web_pages
                .map(|pages| pages.value)
                .unwrap_or_default()
                .into_iter()
                .map(|p| SearchResult {
                    title: p.name,
                    url: p.url,
                    snippet: p.snippet,
                })
                .collect(),
        }
    }
}

pub(super) struct BingProvider {
    client: Client,
    api_key: String,
    max_results: u8,
}

impl BingProvider {
    pub fn new(client: Client, api_key: &str, max_results: u8) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            max_results,
        }
    }
}

#[async_trait]
impl SearchProvider for BingProvider {
    async fn search(&self, query: &str) -> anyhow::Result<SearchResponse> {
        let count = self.max_results.to_string();
        let response = self
            .client
            .get(BING_ENDPOINT)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await?;

        let bing: BingApiResponse = decode("Bing", response).await?;
        Ok(bing.into())
    }

    fn provider_name(&self) -> &str {
        "bing"
    }
}
