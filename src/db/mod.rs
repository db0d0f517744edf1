//! Storage adapter contract and backend selection.
//!
//! Handlers depend only on [`StorageAdapter`]. The three backends implement the
//! required primitives against their own physical model; steps that must not
//! differ between backends (credential hashing and scrubbing, the privacy
//! projection, input validation, output shaping) are provided methods.

pub mod document;
pub mod relational;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use crate::config::StorageConfig;
use crate::error::{BoxError, StoreError, StoreResult};
use crate::models::{
    NewTweet, Page, Relation, Timeline, Tweet, User, UserPatch, UserSet, UserTweet, UsersKind,
};

pub use document::embedded::EmbeddedStore;
pub use document::normalized::NormalizedStore;
pub use relational::RelationalStore;

/// bcrypt work factor for stored credentials.
pub const PASSWORD_COST: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Relational,
    DocumentNormalized,
    DocumentEmbedded,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Relational => "relational",
            Backend::DocumentNormalized => "document-normalized",
            Backend::DocumentEmbedded => "document-embedded",
        }
    }

    /// Whether unfollowed edges survive as inactive records.
    pub fn keeps_inactive_edges(self) -> bool {
        !matches!(self, Backend::DocumentEmbedded)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown backend {0:?}; expected relational, document-normalized or document-embedded")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relational" => Ok(Backend::Relational),
            "document-normalized" => Ok(Backend::DocumentNormalized),
            "document-embedded" => Ok(Backend::DocumentEmbedded),
            _ => Err(UnknownBackend(value.to_string())),
        }
    }
}

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(page: u64, limit: u64) -> Self {
        Pagination { page, limit }
    }

    /// Rows skipped before the window: `(page - 1) * limit`.
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// Paginated, name-filtered user listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    pub pagination: Pagination,
    /// Case-insensitive literal substring of the user's name; empty matches all.
    pub search: String,
}

impl UserQuery {
    pub fn new(page: u64, limit: u64, search: impl Into<String>) -> Self {
        UserQuery {
            pagination: Pagination::new(page, limit),
            search: search.into(),
        }
    }
}

/// Runs `fut` under the per-call budget, wrapping both the store error and an
/// elapsed deadline as [`StoreError::Backend`].
pub(crate) async fn bounded<T, E, F>(budget: Duration, context: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(StoreError::backend(context, err)),
        Err(elapsed) => Err(StoreError::backend(context, elapsed)),
    }
}

/// Like [`bounded`] but leaves the inner result for the caller to classify.
pub(crate) async fn deadline<T, F>(budget: Duration, context: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|elapsed| StoreError::backend(context, elapsed))
}

pub fn hash_password(password: &str) -> StoreResult<String> {
    bcrypt::hash(password, PASSWORD_COST).map_err(|e| StoreError::backend("hash password", e))
}

fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn backend(&self) -> Backend;

    /// Ping. Never performs business logic.
    async fn is_connected(&self) -> bool;

    /// Unscrubbed user by id; `None` when absent.
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Unscrubbed user by email; `None` when absent.
    async fn is_user(&self, email: &str) -> StoreResult<Option<User>>;

    /// Persists a user whose `password` already holds the hash.
    async fn create_user(&self, user: &User) -> StoreResult<String>;

    async fn modify_registry(&self, user_id: &str, patch: &UserPatch) -> StoreResult<()>;

    /// Persists a validated post as active.
    async fn create_tweet(&self, tweet: &NewTweet) -> StoreResult<String>;

    async fn get_tweets(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<Tweet>>;

    async fn delete_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()>;

    async fn is_relation(&self, source: &str, target: &str) -> StoreResult<Option<Relation>>;

    /// Creates or reactivates the edge; `AlreadyActive` when it is live.
    async fn follow(&self, source: &str, target: &str) -> StoreResult<()>;

    async fn delete_relation(&self, source: &str, target: &str) -> StoreResult<()>;

    /// Physically removes a post. Same ownership rules as [`delete_tweet`];
    /// not reachable from the HTTP surface.
    ///
    /// [`delete_tweet`]: StorageAdapter::delete_tweet
    async fn purge_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()>;

    /// Physically removes the edge, active or not. A no-op when absent.
    async fn purge_relation(&self, source: &str, target: &str) -> StoreResult<()>;

    /// Unprojected listing of one side of the follow graph.
    async fn query_users(
        &self,
        set: UserSet,
        user_id: &str,
        query: &UserQuery,
    ) -> StoreResult<Page<User>>;

    /// Merged, date-descending active posts of everyone `user_id` follows.
    async fn timeline(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<UserTweet>>;

    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.find_user(user_id).await?.map(User::scrubbed))
    }

    async fn insert_user(&self, mut user: User) -> StoreResult<String> {
        user.password = hash_password(&user.password)?;
        let id = self.create_user(&user).await?;
        info!("registered user {} on {}", id, self.backend());
        Ok(id)
    }

    async fn try_login(&self, email: &str, password: &str) -> StoreResult<Option<User>> {
        let Some(user) = self.is_user(email).await? else {
            return Ok(None);
        };
        if !verify_password(password, &user.password) {
            debug!("login rejected for {}", email);
            return Ok(None);
        }
        Ok(Some(user.scrubbed()))
    }

    async fn insert_tweet(&self, tweet: NewTweet) -> StoreResult<String> {
        if tweet.message.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        self.create_tweet(&tweet).await
    }

    async fn insert_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        if source == target {
            return Err(StoreError::SelfRelation);
        }
        if self.find_user(target).await?.is_none() {
            return Err(StoreError::TargetNotFound(target.to_string()));
        }
        self.follow(source, target).await
    }

    async fn get_followers(&self, user_id: &str, query: &UserQuery) -> StoreResult<Page<User>> {
        self.projected_users(UserSet::Followers, user_id, query).await
    }

    async fn get_following(&self, user_id: &str, query: &UserQuery) -> StoreResult<Page<User>> {
        self.projected_users(UserSet::Following, user_id, query).await
    }

    async fn get_not_following(&self, user_id: &str, query: &UserQuery) -> StoreResult<Page<User>> {
        self.projected_users(UserSet::NotFollowing, user_id, query).await
    }

    /// Legacy composite listing: `new` is the not-following list, `follow` the
    /// following list.
    async fn get_users(
        &self,
        user_id: &str,
        query: &UserQuery,
        kind: UsersKind,
    ) -> StoreResult<Page<User>> {
        self.projected_users(kind.user_set(), user_id, query).await
    }

    async fn get_following_tweets(
        &self,
        user_id: &str,
        pagination: Pagination,
        only_tweets: bool,
    ) -> StoreResult<Timeline> {
        let page = self.timeline(user_id, pagination).await?;
        Ok(if only_tweets {
            Timeline::Tweets(page.map(Tweet::from))
        } else {
            Timeline::UserTweets(page)
        })
    }

    #[doc(hidden)]
    async fn projected_users(
        &self,
        set: UserSet,
        user_id: &str,
        query: &UserQuery,
    ) -> StoreResult<Page<User>> {
        let page = self.query_users(set, user_id, query).await?;
        Ok(page.map(User::public_projection))
    }
}

pub type SharedStore = Arc<dyn StorageAdapter>;

/// Builds the configured adapter. Called once at startup.
pub async fn connect(config: &StorageConfig) -> StoreResult<SharedStore> {
    let store: SharedStore = match config.backend {
        Backend::Relational => Arc::new(RelationalStore::connect(config).await?),
        Backend::DocumentNormalized => Arc::new(NormalizedStore::connect(config).await?),
        Backend::DocumentEmbedded => Arc::new(EmbeddedStore::connect(config).await?),
    };
    info!("storage adapter ready: {}", store.backend());
    Ok(store)
}
