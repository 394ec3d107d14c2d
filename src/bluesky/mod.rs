//! Client for the Bluesky platform API: session storage, auth with
//! single-flight refresh, and the post search endpoint.

pub mod auth;
pub mod client;
pub mod session;
pub mod types;

pub use auth::{AuthClient, AuthError, RefreshApi, SingleFlightRefresher};
pub use client::{BlueskyClient, BlueskyError, PostSort, SearchParams};
pub use session::{RedisSessionStore, SessionStore};
pub use types::{AuthorView, PostRecord, PostView, SearchPostsResponse, Session};
