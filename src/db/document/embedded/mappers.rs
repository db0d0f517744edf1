//! Documents of the single-collection layout: every user carries its posts in
//! `tweets` and the ids it follows in `following`.

use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use crate::db::document::{from_bson_date, to_bson_date};
use crate::models::{NewTweet, Tweet, User};

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
    #[serde(default)]
    pub tweets: Vec<EmbeddedTweet>,
    #[serde(default)]
    pub following: Vec<ObjectId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EmbeddedTweet {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub message: String,
    pub date: BsonDateTime,
    pub active: bool,
}

/// Row of the own-posts aggregation: an unwound embedded post plus its owner.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OwnedTweetDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub message: String,
    pub date: BsonDateTime,
    pub active: bool,
}

/// New user document with empty post and following arrays.
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
        tweets: Vec::new(),
        following: Vec::new(),
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

/// Element pushed onto the owner's `tweets` array.
pub(crate) fn embedded_tweet(id: ObjectId, tweet: &NewTweet) -> Document {
    doc! {
        "_id": id,
        "message": tweet.message.as_str(),
        "date": to_bson_date(tweet.date),
        "active": true,
    }
}

impl From<OwnedTweetDocument> for Tweet {
    fn from(doc: OwnedTweetDocument) -> Self {
        Tweet {
            id: doc.id.to_hex(),
            user_id: doc.user_id.to_hex(),
            message: doc.message,
            date: from_bson_date(doc.date),
            active: doc.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use mongodb::bson;

    #[test]
    fn new_users_start_with_empty_arrays() {
        let raw = bson::to_document(&user_document(&User {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "hash".into(),
            ..User::default()
        }))
        .unwrap();
        assert!(raw.get_array("tweets").unwrap().is_empty());
        assert!(raw.get_array("following").unwrap().is_empty());
        assert!(raw.get("_id").is_none());
    }

    #[test]
    fn documents_without_arrays_still_load() {
        let id = ObjectId::new();
        let raw = doc! {
            "_id": id,
            "name": "Ada",
            "lastName": "Lovelace",
            "birthDate": BsonDateTime::from_millis(0),
            "email": "ada@example.com",
            "password": "hash",
        };
        let user: UserDocument = bson::from_document(raw).unwrap();
        assert!(user.following.is_empty());
        assert_eq!(user_from_document(user).id, id.to_hex());
    }

    #[test]
    fn pushed_tweets_are_active() {
        let date = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let id = ObjectId::new();
        let pushed = embedded_tweet(
            id,
            &NewTweet {
                user_id: ObjectId::new().to_hex(),
                message: "hi".into(),
                date,
            },
        );
        assert_eq!(pushed.get_object_id("_id").unwrap(), id);
        assert!(pushed.get_bool("active").unwrap());
        let parsed: EmbeddedTweet = bson::from_document(pushed).unwrap();
        assert_eq!(from_bson_date(parsed.date), date);
    }
}
