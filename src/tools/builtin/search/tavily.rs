//! Tavily provider: `POST /search`, key in the body. The only provider
//! that returns a ready-made answer, surfaced as `summary`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{decode, SearchProvider, SearchResponse, SearchResult};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Serialize)]
struct Query<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    max_results: u8,
    include_answer: bool,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl From<Reply> for SearchResponse {
    fn from(reply: Reply) -> Self {
        let results = reply
            .results
            .into_iter()
            .map(|hit| SearchResult {
                title: hit.title,
                url: hit.url,
                snippet: hit.content,
            })
            .collect();
        SearchResponse {
            summary: reply.answer,
            results,
        }
    }
}

pub(super) struct TavilyProvider {
    client: Client,
    api_key: String,
    max_results: u8,
}

impl TavilyProvider {
    pub fn new(client: Client, api_key: &str, max_results: u8) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            max_results,
        }
    }

    fn query<'a>(&'a self, query: &'a str) -> Query<'a> {
        Query {
            api_key: &self.api_key,
            query,
            search_depth: "basic",
            max_results: self.max_results,
            include_answer: true,
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    async fn search(&self, query: &str) -> anyhow::Result<SearchResponse> {
        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .json(&self.query(query))
            .send()
            .await?;
        let reply: Reply = decode("Tavily", response).await?;
        Ok(reply.into())
    }

    fn provider_name(&self) -> &str {
        "tavily"
    }
}
