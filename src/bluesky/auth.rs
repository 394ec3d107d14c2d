//! Session creation and single-flight refresh.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::session::SessionStore;
use super::types::{Session, SessionDto};

/// Errors from the auth endpoints and the refresh path.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("auth endpoint returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("session store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// The network side of a session refresh, separated so the single-flight
/// logic can be exercised without an HTTP stack.
#[async_trait]
pub trait RefreshApi: Send + Sync {
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError>;
}

/// Plain client for the auth endpoints; requests here never carry the
/// standard bearer token, so it sits outside the credential guard.
pub struct AuthClient {
    http: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.to_string(),
        }
    }

    /// Create a fresh session from account credentials.
    pub async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = format!("{}/xrpc/com.atproto.server.createSession", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "identifier": identifier,
                "password": password,
            }))
            .send()
            .await?;

        read_session(response).await
    }
}

#[async_trait]
impl RefreshApi for AuthClient {
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let url = format!("{}/xrpc/com.atproto.server.refreshSession", self.base_url);

        // The refresh endpoint authenticates with the refresh token itself.
        let response = self.http.post(&url).bearer_auth(refresh_token).send().await?;

        read_session(response).await
    }
}

async fn read_session(response: reqwest::Response) -> Result<Session, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let dto: SessionDto = response.json().await?;
    Ok(dto.into())
}

/// Collapses concurrent session refreshes into a single network call.
///
/// The mutex is the gate and its value the deduplication cache: under a burst
/// of 401s caused by one expired token, the first caller performs the refresh
/// while the rest block on the lock; when they get in, the cached session's
/// refresh token no longer matches the stale one they present, so they reuse
/// the cached result instead of refreshing again.
///
/// Must be owned by one long-lived instance; a per-request refresher would
/// give every caller its own gate and defeat the deduplication.
pub struct SingleFlightRefresher {
    api: Arc<dyn RefreshApi>,
    store: Arc<dyn SessionStore>,
    cached: Mutex<Option<Session>>,
}

impl SingleFlightRefresher {
    pub fn new(api: Arc<dyn RefreshApi>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            api,
            store,
            cached: Mutex::new(None),
        }
    }

    /// Refresh the session the presented token belongs to, or return the
    /// already-refreshed one if another caller beat us to it.
    ///
    /// On a refresh failure the caller must treat its session as invalid for
    /// this attempt; there is no automatic retry here.
    pub async fn refresh(&self, presented_refresh_token: &str) -> Result<Session, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(session) = cached.as_ref() {
            if session.refresh_token != presented_refresh_token {
                debug!("session already refreshed by another caller; reusing it");
                return Ok(session.clone());
            }
        }

        let session = self.api.refresh_session(presented_refresh_token).await?;

        // Persist before publishing to other callers; both tokens land in the
        // store atomically.
        self.store
            .save_session(&session)
            .await
            .map_err(AuthError::Store)?;
        *cached = Some(session.clone());

        info!("platform session refreshed");

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct CountingApi {
        calls: AtomicUsize,
        next: Session,
    }

    impl CountingApi {
        fn new(next: Session) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                next,
            }
        }
    }

    #[async_trait]
    impl RefreshApi for CountingApi {
        async fn refresh_session(&self, _refresh_token: &str) -> Result<Session, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent callers pile up on the gate.
            tokio::task::yield_now().await;
            Ok(self.next.clone())
        }
    }

    struct FailingApi;

    #[async_trait]
    impl RefreshApi for FailingApi {
        async fn refresh_session(&self, _refresh_token: &str) -> Result<Session, AuthError> {
            Err(AuthError::Api {
                status: 400,
                message: "expired".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        session: StdMutex<Option<Session>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn get_session(&self) -> anyhow::Result<Option<Session>> {
            Ok(self.session.lock().unwrap().clone())
        }

        async fn save_session(&self, session: &Session) -> anyhow::Result<()> {
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(())
        }
    }

    fn session(access: &str, refresh: &str) -> Session {
        Session {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[tokio::test]
    async fn concurrent_stale_tokens_trigger_exactly_one_refresh() {
        let api = Arc::new(CountingApi::new(session("a2", "r2")));
        let store = Arc::new(MemoryStore::default());
        let refresher = Arc::new(SingleFlightRefresher::new(api.clone(), store.clone()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let refresher = Arc::clone(&refresher);
            handles.push(tokio::spawn(async move { refresher.refresh("r1").await }));
        }

        for handle in handles {
            let refreshed = handle.await.unwrap().unwrap();
            assert_eq!(refreshed.access_token, "a2");
            assert_eq!(refreshed.refresh_token, "r2");
        }

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_session().await.unwrap(), Some(session("a2", "r2")));
    }

    #[tokio::test]
    async fn presenting_the_current_token_refreshes_again() {
        let api = Arc::new(CountingApi::new(session("a3", "r3")));
        let store = Arc::new(MemoryStore::default());
        let refresher = SingleFlightRefresher::new(api.clone(), store);

        refresher.refresh("r1").await.unwrap();
        // "r3" matches the cached refresh token, so this is a genuine new
        // expiry and must hit the network again.
        refresher.refresh("r3").await.unwrap();

        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_token_after_completed_refresh_reuses_cache() {
        let api = Arc::new(CountingApi::new(session("a2", "r2")));
        let store = Arc::new(MemoryStore::default());
        let refresher = SingleFlightRefresher::new(api.clone(), store);

        refresher.refresh("r1").await.unwrap();
        let reused = refresher.refresh("r1").await.unwrap();

        assert_eq!(reused.access_token, "a2");
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_propagates_and_caches_nothing() {
        let store = Arc::new(MemoryStore::default());
        let refresher = SingleFlightRefresher::new(Arc::new(FailingApi), store.clone());

        let result = refresher.refresh("r1").await;
        assert!(matches!(result, Err(AuthError::Api { status: 400, .. })));
        assert_eq!(store.get_session().await.unwrap(), None);
    }
}
