//! Search client guarded by the stored session and single-flight refresh.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::auth::{AuthError, SingleFlightRefresher};
use super::session::SessionStore;
use super::types::SearchPostsResponse;

/// Errors from outbound platform calls.
#[derive(Debug, Error)]
pub enum BlueskyError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no session in the session store")]
    NoSession,

    #[error("unauthorized and session refresh failed: {0}")]
    Unauthorized(#[source] AuthError),

    #[error("session store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Sort order accepted by the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSort {
    Top,
    Latest,
}

impl PostSort {
    pub fn as_str(self) -> &'static str {
        match self {
            PostSort::Top => "top",
            PostSort::Latest => "latest",
        }
    }
}

/// Optional search parameters beyond the query text.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub sort: Option<PostSort>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub lang: Option<String>,
    pub limit: Option<u32>,
}

/// Outcome of one search request, before the retry decision.
#[derive(Debug)]
pub(crate) enum SearchAttempt {
    Success(SearchPostsResponse),
    Unauthorized,
    Failed { status: u16, message: String },
}

/// The network side of a search, separated so the 401-retry protocol can be
/// exercised without an HTTP stack.
#[async_trait]
pub(crate) trait SearchTransport: Send + Sync {
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
        access_token: &str,
    ) -> Result<SearchAttempt, BlueskyError>;
}

struct HttpSearchTransport {
    http: Client,
    base_url: String,
}

#[async_trait]
impl SearchTransport for HttpSearchTransport {
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
        access_token: &str,
    ) -> Result<SearchAttempt, BlueskyError> {
        let url = format!("{}/xrpc/app.bsky.feed.searchPosts", self.base_url);

        let mut request = self
            .http
            .get(&url)
            .query(&[("q", query)])
            .bearer_auth(access_token);

        if let Some(sort) = params.sort {
            request = request.query(&[("sort", sort.as_str())]);
        }
        if let Some(since) = params.since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        if let Some(until) = params.until {
            request = request.query(&[("until", until.to_rfc3339())]);
        }
        if let Some(lang) = &params.lang {
            request = request.query(&[("lang", lang.as_str())]);
        }
        if let Some(limit) = params.limit {
            request = request.query(&[("limit", limit.to_string())]);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Ok(SearchAttempt::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Ok(SearchAttempt::Failed {
                status: status.as_u16(),
                message,
            });
        }

        Ok(SearchAttempt::Success(response.json().await?))
    }
}

/// Client for the post search endpoint.
///
/// Every call fetches the session from the store and sends with its bearer
/// token. A 401 triggers one single-flight refresh and exactly one retry with
/// the renewed token; a failed refresh surfaces as [`BlueskyError::Unauthorized`].
pub struct BlueskyClient {
    transport: Arc<dyn SearchTransport>,
    store: Arc<dyn SessionStore>,
    refresher: Arc<SingleFlightRefresher>,
}

impl BlueskyClient {
    pub fn new(
        base_url: &str,
        store: Arc<dyn SessionStore>,
        refresher: Arc<SingleFlightRefresher>,
    ) -> Self {
        let transport = HttpSearchTransport {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.to_string(),
        };

        Self {
            transport: Arc::new(transport),
            store,
            refresher,
        }
    }

    /// Search posts matching `query`.
    pub async fn search_posts(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<SearchPostsResponse, BlueskyError> {
        let session = self
            .store
            .get_session()
            .await
            .map_err(BlueskyError::Store)?
            .ok_or(BlueskyError::NoSession)?;

        match self
            .transport
            .search(query, params, &session.access_token)
            .await?
        {
            SearchAttempt::Success(response) => Ok(response),
            SearchAttempt::Failed { status, message } => {
                Err(BlueskyError::Api { status, message })
            }
            SearchAttempt::Unauthorized => {
                debug!("search unauthorized; refreshing session");
                let renewed = self
                    .refresher
                    .refresh(&session.refresh_token)
                    .await
                    .map_err(BlueskyError::Unauthorized)?;

                // Exactly one retry with the renewed token.
                match self
                    .transport
                    .search(query, params, &renewed.access_token)
                    .await?
                {
                    SearchAttempt::Success(response) => Ok(response),
                    SearchAttempt::Failed { status, message } => {
                        Err(BlueskyError::Api { status, message })
                    }
                    SearchAttempt::Unauthorized => Err(BlueskyError::Api {
                        status: 401,
                        message: "unauthorized after session refresh".to_string(),
                    }),
                }
            }
        }
    }
}
