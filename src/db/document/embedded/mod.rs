//! Single-collection document backend.
//!
//! Posts are embedded in their author's document and the follow graph is the
//! `following` id array. Unfollowing pulls the id out of the array, so no
//! inactive edge survives it.

mod mappers;
mod pipelines;

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::FindOneOptions;
use mongodb::{Client, Collection, Database};

use self::mappers::{
    embedded_tweet, user_document, user_from_document, OwnedTweetDocument, UserDocument,
};
use crate::config::StorageConfig;
use crate::db::document::{
    connect_client, ensure_unique_index, is_duplicate_key, object_id, ping, run_paged,
    to_bson_date, UserSummaryDocument, UserTweetDocument,
};
use crate::db::{bounded, deadline, Backend, Pagination, StorageAdapter, UserQuery};
use crate::error::{StoreError, StoreResult};
use crate::models::{NewTweet, Page, Relation, Tweet, User, UserPatch, UserSet, UserTweet};

pub(crate) const USERS: &str = "users";

pub struct EmbeddedStore {
    client: Client,
    db: Database,
    timeout: Duration,
}

/// Profile reads never load the embedded posts.
fn without_tweets() -> FindOneOptions {
    FindOneOptions::builder()
        .projection(doc! { "tweets": 0 })
        .build()
}

impl EmbeddedStore {
    pub async fn connect(config: &StorageConfig) -> StoreResult<Self> {
        let client = connect_client(config, Backend::DocumentEmbedded).await?;
        let db = client.database(config.database_name());
        let store = EmbeddedStore {
            client,
            db,
            timeout: config.timeout,
        };
        ensure_unique_index(&store.raw(), doc! { "email": 1 }, store.timeout).await?;
        info!("document-embedded backend using database {}", config.database_name());
        Ok(store)
    }

    fn users(&self) -> Collection<UserDocument> {
        self.db.collection(USERS)
    }

    fn raw(&self) -> Collection<Document> {
        self.db.collection(USERS)
    }

    async fn user_exists(&self, id: ObjectId) -> StoreResult<bool> {
        let count = bounded(self.timeout, "find user", async {
            self.raw().count_documents(doc! { "_id": id }).await
        })
        .await?;
        Ok(count > 0)
    }

    async fn find_one_user(&self, context: &'static str, filter: Document) -> StoreResult<Option<User>> {
        let found = bounded(self.timeout, context, async {
            self.users()
                .find_one(filter)
                .with_options(without_tweets())
                .await
        })
        .await?;
        Ok(found.map(user_from_document))
    }

    /// Resolves a post the caller may delete, with the owning document's id.
    async fn owned_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<(ObjectId, ObjectId)> {
        let id = object_id(tweet_id)?;
        let caller = object_id(caller_id)?;
        let owner = bounded(self.timeout, "find tweet", async {
            self.raw()
                .find_one(doc! { "tweets._id": id })
                .projection(doc! { "_id": 1 })
                .await
        })
        .await?
        .ok_or_else(|| StoreError::not_found("tweet"))?;

        if owner.get_object_id("_id").ok() != Some(caller) {
            return Err(StoreError::NotOwner);
        }
        Ok((id, caller))
    }
}

#[async_trait]
impl StorageAdapter for EmbeddedStore {
    fn backend(&self) -> Backend {
        Backend::DocumentEmbedded
    }

    async fn is_connected(&self) -> bool {
        ping(&self.client, self.timeout).await.is_ok()
    }

    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let id = object_id(user_id)?;
        self.find_one_user("find user", doc! { "_id": id }).await
    }

    async fn is_user(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one_user("find user by email", doc! { "email": email })
            .await
    }

    async fn create_user(&self, user: &User) -> StoreResult<String> {
        let document = user_document(user);
        let inserted = deadline(self.timeout, "insert user", async {
            self.users().insert_one(&document).await
        })
        .await?;

        match inserted {
            Ok(result) => result
                .inserted_id
                .as_object_id()
                .map(|id| id.to_hex())
                .ok_or_else(|| StoreError::backend("insert user", "server returned a non-ObjectId key")),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::DuplicateEmail(user.email.clone())),
            Err(e) => Err(StoreError::backend("insert user", e)),
        }
    }

    async fn modify_registry(&self, user_id: &str, patch: &UserPatch) -> StoreResult<()> {
        let id = object_id(user_id)?;
        let mut set = Document::new();
        for (field, value) in patch.text_fields() {
            set.insert(field.key(), value);
        }
        if let Some(date) = patch.birth_date() {
            set.insert("birthDate", to_bson_date(date));
        }

        if set.is_empty() {
            if !self.user_exists(id).await? {
                return Err(StoreError::not_found("user"));
            }
            return Ok(());
        }

        let result = bounded(self.timeout, "modify registry", async {
            self.raw()
                .update_one(doc! { "_id": id }, doc! { "$set": set })
                .await
        })
        .await?;
        if result.matched_count == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }

    async fn create_tweet(&self, tweet: &NewTweet) -> StoreResult<String> {
        let owner = object_id(&tweet.user_id)?;
        let id = ObjectId::new();
        let pushed = embedded_tweet(id, tweet);
        let result = bounded(self.timeout, "insert tweet", async {
            self.raw()
                .update_one(doc! { "_id": owner }, doc! { "$push": { "tweets": pushed } })
                .await
        })
        .await?;
        if result.matched_count == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(id.to_hex())
    }

    async fn get_tweets(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<Tweet>> {
        let owner = object_id(user_id)?;
        let (rows, total) = run_paged::<OwnedTweetDocument>(
            &self.raw(),
            self.timeout,
            "get tweets",
            &pipelines::own_tweets(owner),
            pagination,
        )
        .await?;
        Ok(Page::new(rows.into_iter().map(Tweet::from).collect(), total))
    }

    async fn delete_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()> {
        let (id, owner) = self.owned_tweet(tweet_id, caller_id).await?;
        bounded(self.timeout, "delete tweet", async {
            self.raw()
                .update_one(
                    doc! { "_id": owner, "tweets._id": id },
                    doc! { "$set": { "tweets.$.active": false } },
                )
                .await
        })
        .await?;
        Ok(())
    }

    async fn purge_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()> {
        let (id, owner) = self.owned_tweet(tweet_id, caller_id).await?;
        bounded(self.timeout, "purge tweet", async {
            self.raw()
                .update_one(
                    doc! { "_id": owner },
                    doc! { "$pull": { "tweets": { "_id": id } } },
                )
                .await
        })
        .await?;
        Ok(())
    }

    async fn is_relation(&self, source: &str, target: &str) -> StoreResult<Option<Relation>> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        let count = bounded(self.timeout, "find relation", async {
            self.raw()
                .count_documents(doc! { "_id": src, "following": tgt })
                .await
        })
        .await?;
        Ok((count > 0).then(|| Relation {
            user_id: source.to_string(),
            user_relation_id: target.to_string(),
            active: true,
        }))
    }

    async fn follow(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        let result = bounded(self.timeout, "insert relation", async {
            self.raw()
                .update_one(doc! { "_id": src }, doc! { "$addToSet": { "following": tgt } })
                .await
        })
        .await?;

        if result.matched_count == 0 {
            return Err(StoreError::not_found("user"));
        }
        if result.modified_count == 0 {
            return Err(StoreError::AlreadyActive(target.to_string()));
        }
        debug!("{source} now follows {target}");
        Ok(())
    }

    async fn delete_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        bounded(self.timeout, "delete relation", async {
            self.raw()
                .update_one(doc! { "_id": src }, doc! { "$pull": { "following": tgt } })
                .await
        })
        .await?;
        Ok(())
    }

    /// Unfollowing already pulls the id, so purging is the same update.
    async fn purge_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        self.delete_relation(source, target).await
    }

    async fn query_users(
        &self,
        set: UserSet,
        user_id: &str,
        query: &UserQuery,
    ) -> StoreResult<Page<User>> {
        let user = object_id(user_id)?;
        let (pipeline, context) = match set {
            UserSet::Followers => (pipelines::followers(user, &query.search), "get followers"),
            UserSet::Following => (pipelines::following(user, &query.search), "get following"),
            UserSet::NotFollowing => (
                pipelines::not_following(user, &query.search),
                "get not following",
            ),
        };

        let (rows, total) = run_paged::<UserSummaryDocument>(
            &self.raw(),
            self.timeout,
            context,
            &pipeline,
            query.pagination,
        )
        .await?;
        Ok(Page::new(rows.into_iter().map(User::from).collect(), total))
    }

    async fn timeline(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<UserTweet>> {
        let user = object_id(user_id)?;
        let (rows, total) = run_paged::<UserTweetDocument>(
            &self.raw(),
            self.timeout,
            "get following tweets",
            &pipelines::timeline(user),
            pagination,
        )
        .await?;
        Ok(Page::new(rows.into_iter().map(UserTweet::from).collect(), total))
    }
}
