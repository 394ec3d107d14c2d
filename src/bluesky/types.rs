//! Wire types for the platform API.
//!
//! DTOs mirror the JSON the API actually returns; domain code only touches
//! the fields it consumes, so schema drift stays contained here.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// An authenticated platform session.
///
/// Both tokens are always read and written together; a partially updated
/// session never exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session payload returned by the create/refresh endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct SessionDto {
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
}

impl From<SessionDto> for Session {
    fn from(dto: SessionDto) -> Self {
        Self {
            access_token: dto.access_jwt,
            refresh_token: dto.refresh_jwt,
        }
    }
}

/// Response of the post search endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPostsResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub hits_total: Option<u64>,
    pub posts: Vec<PostView>,
}

/// A single post as returned by the search endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: AuthorView,
    pub record: PostRecord,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub repost_count: u32,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub quote_count: u32,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Basic author profile attached to a post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorView {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// The written content of a post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    #[serde(default)]
    pub langs: Vec<String>,
}
