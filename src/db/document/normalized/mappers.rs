//! Document shapes of the three-collection layout and their mapping to the
//! contract models.

use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::db::document::{from_bson_date, to_bson_date};
use crate::models::{NewTweet, Relation, Tweet, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub last_name: String,
    pub birth_date: BsonDateTime,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub biography: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub web_site: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TweetDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub message: String,
    pub date: BsonDateTime,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RelationDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub user_relation_id: ObjectId,
    pub active: bool,
}

/// New user document; the id is assigned by the server.
pub(crate) fn user_document(user: &User) -> UserDocument {
    UserDocument {
        id: None,
        name: user.name.clone(),
        last_name: user.last_name.clone(),
        birth_date: to_bson_date(user.birth_date),
        email: user.email.clone(),
        password: user.password.clone(),
        avatar: user.avatar.clone(),
        banner: user.banner.clone(),
        biography: user.biography.clone(),
        location: user.location.clone(),
        web_site: user.web_site.clone(),
    }
}

pub(crate) fn user_from_document(doc: UserDocument) -> User {
    User {
        id: doc.id.map(|id| id.to_hex()).unwrap_or_default(),
        name: doc.name,
        last_name: doc.last_name,
        birth_date: from_bson_date(doc.birth_date),
        email: doc.email,
        password: doc.password,
        avatar: doc.avatar,
        banner: doc.banner,
        biography: doc.biography,
        location: doc.location,
        web_site: doc.web_site,
    }
}

pub(crate) fn tweet_document(tweet: &NewTweet, owner: ObjectId) -> TweetDocument {
    TweetDocument {
        id: None,
        user_id: owner,
        message: tweet.message.clone(),
        date: to_bson_date(tweet.date),
        active: true,
    }
}

pub(crate) fn tweet_from_document(doc: TweetDocument) -> Tweet {
    Tweet {
        id: doc.id.map(|id| id.to_hex()).unwrap_or_default(),
        user_id: doc.user_id.to_hex(),
        message: doc.message,
        date: from_bson_date(doc.date),
        active: doc.active,
    }
}

pub(crate) fn relation_from_document(doc: RelationDocument) -> Relation {
    Relation {
        user_id: doc.user_id.to_hex(),
        user_relation_id: doc.user_relation_id.to_hex(),
        active: doc.active,
    }
}
