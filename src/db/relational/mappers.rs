//! Row models of the SQL schema and their mapping to the contract models.
//!
//! Dates are stored as INTEGER milliseconds since the epoch.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::{StoreError, StoreResult};
use crate::models::{Relation, Tweet, TweetBody, User, UserTweet};

pub(crate) fn parse_id(id: &str) -> StoreResult<i64> {
    id.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| StoreError::InvalidId(id.to_string()))
}

pub(crate) fn to_millis(date: DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub name: String,
    pub last_name: String,
    pub birth_date: i64,
    pub email: String,
    pub password: String,
    pub avatar: String,
    pub banner: String,
    pub biography: String,
    pub location: String,
    pub web_site: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.to_string(),
            name: row.name,
            last_name: row.last_name,
            birth_date: from_millis(row.birth_date),
            email: row.email,
            password: row.password,
            avatar: row.avatar,
            banner: row.banner,
            biography: row.biography,
            location: row.location,
            web_site: row.web_site,
        }
    }
}

/// Listing row: only the publicly visible columns are selected.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserSummaryRow {
    pub id: i64,
    pub name: String,
    pub last_name: String,
    pub birth_date: i64,
}

impl From<UserSummaryRow> for User {
    fn from(row: UserSummaryRow) -> Self {
        User {
            id: row.id.to_string(),
            name: row.name,
            last_name: row.last_name,
            birth_date: from_millis(row.birth_date),
            ..User::default()
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TweetRow {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub date: i64,
    pub active: bool,
}

impl From<TweetRow> for Tweet {
    fn from(row: TweetRow) -> Self {
        Tweet {
            id: row.id.to_string(),
            user_id: row.user_id.to_string(),
            message: row.message,
            date: from_millis(row.date),
            active: row.active,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct RelationRow {
    pub user_id: i64,
    pub following_id: i64,
    pub active: bool,
}

impl From<RelationRow> for Relation {
    fn from(row: RelationRow) -> Self {
        Relation {
            user_id: row.user_id.to_string(),
            user_relation_id: row.following_id.to_string(),
            active: row.active,
        }
    }
}

/// One joined (edge, post) row of the timeline.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TimelineRow {
    pub user_id: i64,
    pub following_id: i64,
    pub tweet_id: i64,
    pub message: String,
    pub date: i64,
}

impl From<TimelineRow> for UserTweet {
    fn from(row: TimelineRow) -> Self {
        UserTweet {
            user_id: row.user_id.to_string(),
            user_relation_id: row.following_id.to_string(),
            tweet: TweetBody {
                id: row.tweet_id.to_string(),
                message: row.message,
                date: from_millis(row.date),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0")]
    #[case("-4")]
    #[case("abc")]
    #[case("64b7f0c2a1b2c3d4e5f60718")]
    #[case("")]
    fn malformed_ids_are_rejected(#[case] raw: &str) {
        assert!(matches!(parse_id(raw), Err(StoreError::InvalidId(_))));
    }

    #[test]
    fn numeric_ids_parse() {
        assert_eq!(parse_id("42").unwrap(), 42);
    }

    #[test]
    fn timeline_rows_attribute_the_post_to_the_followed_user() {
        let item = UserTweet::from(TimelineRow {
            user_id: 1,
            following_id: 2,
            tweet_id: 3,
            message: "hi".into(),
            date: 1_700_000_000_000,
        });
        assert_eq!(item.user_id, "1");
        assert_eq!(item.user_relation_id, "2");
        assert_eq!(item.tweet.id, "3");
        assert_eq!(to_millis(item.tweet.date), 1_700_000_000_000);
    }

    #[test]
    fn summary_rows_carry_no_private_fields() {
        let user = User::from(UserSummaryRow {
            id: 5,
            name: "Ada".into(),
            last_name: "Lovelace".into(),
            birth_date: 0,
        });
        assert_eq!(user.id, "5");
        assert!(user.email.is_empty());
        assert!(user.password.is_empty());
    }
}
