use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use nightlife_types::models::Venue;

pub const DEFAULT_SEARCH_URL: &str = "https://api.yelp.com/v3/businesses/search";
pub const BAR_CATEGORY: &str = "bars";

/// One request to the venue-search provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueQuery {
    pub location: String,
    pub category: &'static str,
    pub limit: u32,
    pub sort_by_distance: bool,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected our credential. Needs an operator, not a retry.
    #[error("provider rejected the API credential (HTTP {0})")]
    Misconfigured(u16),

    #[error("provider rate limit hit")]
    RateLimited,

    #[error("provider answered HTTP {0}")]
    Status(u16),

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("provider response unreadable: {0}")]
    Decode(String),

    #[error("provider did not answer within {0:?}")]
    TimedOut(Duration),
}

/// Third-party venue search. Results come back in provider order.
pub trait VenueProvider: Send + Sync {
    fn search<'a>(&'a self, query: &'a VenueQuery) -> BoxFuture<'a, Result<Vec<Venue>, ProviderError>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    businesses: Vec<Venue>,
}

/// Yelp Fusion business-search client. The API key never leaves the server.
pub struct YelpClient {
    http: reqwest::Client,
    api_key: String,
    search_url: String,
}

impl YelpClient {
    pub fn new(api_key: String, search_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key,
            search_url,
        })
    }

    async fn fetch(&self, query: &VenueQuery) -> Result<Vec<Venue>, ProviderError> {
        let mut params: Vec<(&str, String)> = vec![
            ("location", query.location.clone()),
            ("term", query.category.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if query.sort_by_distance {
            params.push(("sort_by", "distance".to_string()));
        }

        let response = self
            .http
            .get(&self.search_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .query(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Misconfigured(status.as_u16()),
                StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
                other => ProviderError::Status(other.as_u16()),
            };
            warn!("Venue search for '{}' failed: {}", query.location, err);
            return Err(err);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        debug!("Provider returned {} venues for '{}'", body.businesses.len(), query.location);
        Ok(body.businesses)
    }
}

impl VenueProvider for YelpClient {
    fn search<'a>(&'a self, query: &'a VenueQuery) -> BoxFuture<'a, Result<Vec<Venue>, ProviderError>> {
        Box::pin(self.fetch(query))
    }
}
