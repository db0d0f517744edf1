//! Pieces shared by the two MongoDB backends: identifier and date mapping,
//! client bootstrap, and the count/page aggregation pair.

pub mod embedded;
pub mod normalized;

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{debug, info};
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::db::{bounded, deadline, Backend, Pagination};
use crate::error::{StoreError, StoreResult};
use crate::models::{TweetBody, User, UserTweet};

const DUPLICATE_KEY: i32 = 11000;

pub(crate) fn object_id(id: &str) -> StoreResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| StoreError::InvalidId(id.to_string()))
}

pub(crate) fn to_bson_date(date: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(date.timestamp_millis())
}

pub(crate) fn from_bson_date(date: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or_default()
}

/// Case-insensitive literal substring match on `field`.
pub(crate) fn name_filter(field: &str, search: &str) -> Document {
    let mut filter = Document::new();
    filter.insert(
        field,
        doc! { "$regex": regex::escape(search), "$options": "i" },
    );
    filter
}

pub(crate) fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Privacy-projected user row produced by the listing pipelines.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserSummaryDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_name: String,
    pub birth_date: Option<BsonDateTime>,
}

impl From<UserSummaryDocument> for User {
    fn from(doc: UserSummaryDocument) -> Self {
        User {
            id: doc.id.to_hex(),
            name: doc.name,
            last_name: doc.last_name,
            birth_date: doc.birth_date.map(from_bson_date).unwrap_or_default(),
            ..User::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TweetBodyDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub message: String,
    pub date: BsonDateTime,
}

/// Timeline row: `{userId, userRelationId, tweet: {_id, message, date}}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserTweetDocument {
    pub user_id: ObjectId,
    pub user_relation_id: ObjectId,
    pub tweet: TweetBodyDocument,
}

impl From<UserTweetDocument> for UserTweet {
    fn from(doc: UserTweetDocument) -> Self {
        UserTweet {
            user_id: doc.user_id.to_hex(),
            user_relation_id: doc.user_relation_id.to_hex(),
            tweet: TweetBody {
                id: doc.tweet.id.to_hex(),
                message: doc.tweet.message,
                date: from_bson_date(doc.tweet.date),
            },
        }
    }
}

/// Projection of a joined/unwound user under `prefix` back to a summary row.
pub(crate) fn summary_projection(prefix: &str) -> Document {
    doc! {
        "_id": format!("${prefix}._id"),
        "name": format!("${prefix}.name"),
        "lastName": format!("${prefix}.lastName"),
        "birthDate": format!("${prefix}.birthDate"),
    }
}

/// Base stages shared by a count aggregation and a page aggregation.
///
/// The total is always read from its own `$count` run, never from the length
/// of the page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PagedPipeline {
    pub base: Vec<Document>,
    pub sort: Document,
    pub project: Option<Document>,
}

impl PagedPipeline {
    pub fn new(base: Vec<Document>, sort: Document) -> Self {
        PagedPipeline {
            base,
            sort,
            project: None,
        }
    }

    pub fn project(mut self, project: Document) -> Self {
        self.project = Some(project);
        self
    }

    pub fn count_pipeline(&self) -> Vec<Document> {
        let mut stages = self.base.clone();
        stages.push(doc! { "$count": "total" });
        stages
    }

    pub fn page_pipeline(&self, pagination: Pagination) -> Vec<Document> {
        let mut stages = self.base.clone();
        stages.push(doc! { "$sort": self.sort.clone() });
        stages.push(doc! { "$skip": clamp_i64(pagination.skip()) });
        stages.push(doc! { "$limit": clamp_i64(pagination.limit) });
        if let Some(project) = &self.project {
            stages.push(doc! { "$project": project.clone() });
        }
        stages
    }
}

pub(crate) fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn read_total(count: Option<Document>) -> u64 {
    match count.as_ref().and_then(|d| d.get("total")) {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

/// Runs the count aggregation, then the page aggregation, each under its own
/// deadline.
pub(crate) async fn run_paged<T>(
    collection: &Collection<Document>,
    budget: Duration,
    context: &'static str,
    pipeline: &PagedPipeline,
    pagination: Pagination,
) -> StoreResult<(Vec<T>, u64)>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    debug!("{context}: count pipeline {:?}", pipeline.count_pipeline());
    let count = bounded(budget, context, async {
        let mut cursor = collection.aggregate(pipeline.count_pipeline()).await?;
        cursor.try_next().await
    })
    .await?;
    let total = read_total(count);

    if pagination.limit == 0 {
        return Ok((Vec::new(), total));
    }

    let items = bounded(budget, context, async {
        let cursor = collection
            .aggregate(pipeline.page_pipeline(pagination))
            .await?
            .with_type::<T>();
        cursor.try_collect::<Vec<T>>().await
    })
    .await?;

    Ok((items, total))
}

pub(crate) async fn ping(client: &Client, budget: Duration) -> StoreResult<()> {
    bounded(budget, "ping", async {
        client.database("admin").run_command(doc! { "ping": 1 }).await
    })
    .await
    .map(|_| ())
}

/// Parses the connection string, builds the client and verifies it with a
/// ping.
pub(crate) async fn connect_client(config: &StorageConfig, backend: Backend) -> StoreResult<Client> {
    let name = backend.as_str();
    let mut options = deadline(config.timeout, "parse connection string", async {
        ClientOptions::parse(config.url.as_str()).await
    })
    .await?
    .map_err(|e| StoreError::connection(name, e))?;
    options.app_name = Some("twittor".to_string());
    options.server_selection_timeout = Some(config.timeout);
    options.max_pool_size = Some(config.max_connections);

    let client = Client::with_options(options).map_err(|e| StoreError::connection(name, e))?;
    ping(&client, config.timeout)
        .await
        .map_err(|e| StoreError::connection(name, e))?;
    info!("connected to MongoDB for the {name} backend");
    Ok(client)
}

pub(crate) async fn ensure_unique_index(
    collection: &Collection<Document>,
    keys: Document,
    budget: Duration,
) -> StoreResult<()> {
    let index = IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build();
    bounded(budget, "create index", async {
        collection.create_index(index).await
    })
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_object_ids() {
        assert!(object_id("64b7f0c2a1b2c3d4e5f60718").is_ok());
        match object_id("42") {
            Err(StoreError::InvalidId(id)) => assert_eq!(id, "42"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dates_round_trip_at_millisecond_precision() {
        let date = DateTime::from_timestamp_millis(1_700_000_123_456).unwrap();
        assert_eq!(from_bson_date(to_bson_date(date)), date);
    }

    #[test]
    fn name_filter_escapes_regex_syntax() {
        let filter = name_filter("user.name", "a.b*");
        let inner = filter.get_document("user.name").unwrap();
        assert_eq!(inner.get_str("$regex").unwrap(), r"a\.b\*");
        assert_eq!(inner.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn count_and_page_share_base_stages() {
        let pipeline = PagedPipeline::new(
            vec![doc! { "$match": { "active": true } }],
            doc! { "date": -1 },
        )
        .project(doc! { "_id": 1 });

        let count = pipeline.count_pipeline();
        assert_eq!(count.len(), 2);
        assert_eq!(count[0], pipeline.base[0]);
        assert_eq!(count[1], doc! { "$count": "total" });

        let page = pipeline.page_pipeline(Pagination::new(3, 5));
        assert_eq!(page[0], pipeline.base[0]);
        assert_eq!(page[1], doc! { "$sort": { "date": -1 } });
        assert_eq!(page[2], doc! { "$skip": 10_i64 });
        assert_eq!(page[3], doc! { "$limit": 5_i64 });
        assert_eq!(page[4], doc! { "$project": { "_id": 1 } });
    }

    #[test]
    fn huge_windows_clamp_into_bson_range() {
        let huge = Pagination::new(u64::MAX, u64::MAX);
        assert_eq!(clamp_i64(huge.skip()), i64::MAX);
        assert_eq!(clamp_i64(huge.skip()).unsigned_abs(), i64::MAX as u64);

        let page = PagedPipeline::new(Vec::new(), doc! { "date": -1 }).page_pipeline(huge);
        assert_eq!(page[1], doc! { "$skip": i64::MAX });
        assert_eq!(page[2], doc! { "$limit": i64::MAX });
    }

    #[test]
    fn missing_count_document_means_zero() {
        assert_eq!(read_total(None), 0);
        assert_eq!(read_total(Some(doc! { "total": 7 })), 7);
        assert_eq!(read_total(Some(doc! { "total": 9_i64 })), 9);
    }

    #[test]
    fn summary_rows_map_to_users() {
        let id = ObjectId::new();
        let user = User::from(UserSummaryDocument {
            id,
            name: "Ada".into(),
            last_name: "Lovelace".into(),
            birth_date: Some(BsonDateTime::from_millis(0)),
        });
        assert_eq!(user.id, id.to_hex());
        assert!(user.email.is_empty());
    }

    #[test]
    fn timeline_rows_deserialize_from_projected_documents() {
        let (reader, author, tweet) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let raw = doc! {
            "userId": reader,
            "userRelationId": author,
            "tweet": { "_id": tweet, "message": "hi", "date": BsonDateTime::from_millis(42) },
        };
        let row: UserTweetDocument = mongodb::bson::from_document(raw).unwrap();
        let item = UserTweet::from(row);
        assert_eq!(item.user_relation_id, author.to_hex());
        assert_eq!(item.tweet.id, tweet.to_hex());
        assert_eq!(item.tweet.date.timestamp_millis(), 42);
    }
}
