//! Three-collection document backend: `users`, `tweet` and `relation`.
//!
//! Edges are documents of their own and are soft-deleted through `active`, so
//! this layout mirrors the relational one on a document store.

mod mappers;
mod pipelines;

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, info};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::{Client, Collection, Database};

use self::mappers::{
    relation_from_document, tweet_document, tweet_from_document, user_document,
    user_from_document, RelationDocument, TweetDocument, UserDocument,
};
use crate::config::StorageConfig;
use crate::db::document::{
    clamp_i64, connect_client, ensure_unique_index, is_duplicate_key, object_id, ping, run_paged,
    to_bson_date, UserSummaryDocument, UserTweetDocument,
};
use crate::db::{bounded, deadline, Backend, Pagination, StorageAdapter, UserQuery};
use crate::error::{StoreError, StoreResult};
use crate::models::{NewTweet, Page, Relation, Tweet, User, UserPatch, UserSet, UserTweet};

pub(crate) const USERS: &str = "users";
pub(crate) const TWEETS: &str = "tweet";
pub(crate) const RELATIONS: &str = "relation";

pub struct NormalizedStore {
    client: Client,
    db: Database,
    timeout: Duration,
}

impl NormalizedStore {
    pub async fn connect(config: &StorageConfig) -> StoreResult<Self> {
        let client = connect_client(config, Backend::DocumentNormalized).await?;
        let db = client.database(config.database_name());
        let store = NormalizedStore {
            client,
            db,
            timeout: config.timeout,
        };

        ensure_unique_index(&store.raw(USERS), doc! { "email": 1 }, store.timeout).await?;
        ensure_unique_index(
            &store.raw(RELATIONS),
            doc! { "userId": 1, "userRelationId": 1 },
            store.timeout,
        )
        .await?;
        info!("document-normalized backend using database {}", config.database_name());
        Ok(store)
    }

    fn users(&self) -> Collection<UserDocument> {
        self.db.collection(USERS)
    }

    fn tweets(&self) -> Collection<TweetDocument> {
        self.db.collection(TWEETS)
    }

    fn relations(&self) -> Collection<RelationDocument> {
        self.db.collection(RELATIONS)
    }

    fn raw(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }

    async fn user_exists(&self, id: ObjectId) -> StoreResult<bool> {
        let count = bounded(
            self.timeout,
            "find user",
            async { self.users().count_documents(doc! { "_id": id }).await },
        )
        .await?;
        Ok(count > 0)
    }

    /// Resolves a post the caller may delete.
    async fn owned_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<ObjectId> {
        let id = object_id(tweet_id)?;
        let caller = object_id(caller_id)?;
        let tweet = bounded(
            self.timeout,
            "find tweet",
            async { self.tweets().find_one(doc! { "_id": id }).await },
        )
        .await?
        .ok_or_else(|| StoreError::not_found("tweet"))?;

        if tweet.user_id != caller {
            return Err(StoreError::NotOwner);
        }
        Ok(id)
    }
}

#[async_trait]
impl StorageAdapter for NormalizedStore {
    fn backend(&self) -> Backend {
        Backend::DocumentNormalized
    }

    async fn is_connected(&self) -> bool {
        ping(&self.client, self.timeout).await.is_ok()
    }

    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let id = object_id(user_id)?;
        let found = bounded(
            self.timeout,
            "find user",
            async { self.users().find_one(doc! { "_id": id }).await },
        )
        .await?;
        Ok(found.map(user_from_document))
    }

    async fn is_user(&self, email: &str) -> StoreResult<Option<User>> {
        let found = bounded(
            self.timeout,
            "find user by email",
            async { self.users().find_one(doc! { "email": email }).await },
        )
        .await?;
        Ok(found.map(user_from_document))
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

        let result = bounded(
            self.timeout,
            "modify registry",
            async {
                self.users()
                    .update_one(doc! { "_id": id }, doc! { "$set": set })
                    .await
            },
        )
        .await?;
        if result.matched_count == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }

    async fn create_tweet(&self, tweet: &NewTweet) -> StoreResult<String> {
        let owner = object_id(&tweet.user_id)?;
        if !self.user_exists(owner).await? {
            return Err(StoreError::not_found("user"));
        }
        let document = tweet_document(tweet, owner);
        let result = bounded(
            self.timeout,
            "insert tweet",
            async { self.tweets().insert_one(&document).await },
        )
        .await?;
        result
            .inserted_id
            .as_object_id()
            .map(|id| id.to_hex())
            .ok_or_else(|| StoreError::backend("insert tweet", "server returned a non-ObjectId key"))
    }

    async fn get_tweets(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<Tweet>> {
        let owner = object_id(user_id)?;
        let filter = doc! { "userId": owner, "active": true };
        let total = bounded(
            self.timeout,
            "count tweets",
            async { self.tweets().count_documents(filter.clone()).await },
        )
        .await?;

        if pagination.limit == 0 {
            return Ok(Page::new(Vec::new(), total));
        }

        let tweets = bounded(self.timeout, "get tweets", async {
            let cursor = self
                .tweets()
                .find(filter)
                .sort(doc! { "date": -1, "_id": -1 })
                .skip(clamp_i64(pagination.skip()).unsigned_abs())
                .limit(clamp_i64(pagination.limit))
                .await?;
            cursor.try_collect::<Vec<TweetDocument>>().await
        })
        .await?;

        Ok(Page::new(
            tweets.into_iter().map(tweet_from_document).collect(),
            total,
        ))
    }

    async fn delete_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()> {
        let id = self.owned_tweet(tweet_id, caller_id).await?;
        bounded(
            self.timeout,
            "delete tweet",
            async {
                self.tweets()
                    .update_one(doc! { "_id": id }, doc! { "$set": { "active": false } })
                    .await
            },
        )
        .await?;
        Ok(())
    }

    async fn purge_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()> {
        let id = self.owned_tweet(tweet_id, caller_id).await?;
        bounded(
            self.timeout,
            "purge tweet",
            async { self.tweets().delete_one(doc! { "_id": id }).await },
        )
        .await?;
        Ok(())
    }

    async fn is_relation(&self, source: &str, target: &str) -> StoreResult<Option<Relation>> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        let found = bounded(
            self.timeout,
            "find relation",
            async {
                self.relations()
                    .find_one(doc! { "userId": src, "userRelationId": tgt })
                    .await
            },
        )
        .await?;
        Ok(found.map(relation_from_document))
    }

    async fn follow(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        let edge = doc! { "userId": src, "userRelationId": tgt };
        let existing = bounded(
            self.timeout,
            "find relation",
            async { self.relations().find_one(edge.clone()).await },
        )
        .await?;

        match existing {
            Some(relation) if relation.active => {
                Err(StoreError::AlreadyActive(target.to_string()))
            }
            Some(_) => {
                bounded(
                    self.timeout,
                    "reactivate relation",
                    async {
                        self.relations()
                            .update_one(edge, doc! { "$set": { "active": true } })
                            .await
                    },
                )
                .await?;
                debug!("{source} follows {target} again");
                Ok(())
            }
            None => {
                if !self.user_exists(src).await? {
                    return Err(StoreError::not_found("user"));
                }
                let document = RelationDocument {
                    id: None,
                    user_id: src,
                    user_relation_id: tgt,
                    active: true,
                };
                let inserted = deadline(self.timeout, "insert relation", async {
                    self.relations().insert_one(&document).await
                })
                .await?;
                match inserted {
                    Ok(_) => {
                        debug!("{source} now follows {target}");
                        Ok(())
                    }
                    Err(e) if is_duplicate_key(&e) => {
                        Err(StoreError::AlreadyActive(target.to_string()))
                    }
                    Err(e) => Err(StoreError::backend("insert relation", e)),
                }
            }
        }
    }

    async fn delete_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        bounded(
            self.timeout,
            "delete relation",
            async {
                self.relations()
                    .update_one(
                        doc! { "userId": src, "userRelationId": tgt },
                        doc! { "$set": { "active": false } },
                    )
                    .await
            },
        )
        .await?;
        Ok(())
    }

    async fn purge_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (object_id(source)?, object_id(target)?);
        bounded(
            self.timeout,
            "purge relation",
            async {
                self.relations()
                    .delete_one(doc! { "userId": src, "userRelationId": tgt })
                    .await
            },
        )
        .await?;
        Ok(())
    }

    async fn query_users(
        &self,
        set: UserSet,
        user_id: &str,
        query: &UserQuery,
    ) -> StoreResult<Page<User>> {
        let user = object_id(user_id)?;
        let (collection, pipeline, context) = match set {
            UserSet::Followers => (
                RELATIONS,
                pipelines::followers(user, &query.search),
                "get followers",
            ),
            UserSet::Following => (
                RELATIONS,
                pipelines::following(user, &query.search),
                "get following",
            ),
            UserSet::NotFollowing => (
                USERS,
                pipelines::not_following(user, &query.search),
                "get not following",
            ),
        };

        let (rows, total) = run_paged::<UserSummaryDocument>(
            &self.raw(collection),
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
            &self.raw(RELATIONS),
            self.timeout,
            "get following tweets",
            &pipelines::timeline(user),
            pagination,
        )
        .await?;
        Ok(Page::new(rows.into_iter().map(UserTweet::from).collect(), total))
    }
}
