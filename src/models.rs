//! Backend-agnostic shapes that cross the storage contract.
//!
//! Identifiers are strings here; each backend's mappers translate them to the
//! native key type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub birth_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Plain password on the way in, bcrypt hash once persisted.
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avatar: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub banner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub biography: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub web_site: String,
}

impl User {
    /// Drops the credential hash. Applied to every profile read.
    pub fn scrubbed(mut self) -> Self {
        self.password.clear();
        self
    }

    /// Keeps only identifier, name, last name and birth date.
    pub fn public_projection(self) -> Self {
        User {
            id: self.id,
            name: self.name,
            last_name: self.last_name,
            birth_date: self.birth_date,
            ..User::default()
        }
    }
}

/// Sparse update of a user's profile: `None` and empty strings leave the
/// stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub birth_date: Option<DateTime<Utc>>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub biography: Option<String>,
    pub location: Option<String>,
    pub web_site: Option<String>,
}

/// Text columns a [`UserPatch`] may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchField {
    Name,
    LastName,
    Avatar,
    Banner,
    Biography,
    Location,
    WebSite,
}

impl PatchField {
    /// Column name in the relational schema.
    pub fn column(self) -> &'static str {
        match self {
            PatchField::Name => "name",
            PatchField::LastName => "last_name",
            PatchField::Avatar => "avatar",
            PatchField::Banner => "banner",
            PatchField::Biography => "biography",
            PatchField::Location => "location",
            PatchField::WebSite => "web_site",
        }
    }

    /// Field key in the document schemas.
    pub fn key(self) -> &'static str {
        match self {
            PatchField::Name => "name",
            PatchField::LastName => "lastName",
            PatchField::Avatar => "avatar",
            PatchField::Banner => "banner",
            PatchField::Biography => "biography",
            PatchField::Location => "location",
            PatchField::WebSite => "webSite",
        }
    }
}

impl UserPatch {
    /// Non-empty text fields, in a stable order.
    pub fn text_fields(&self) -> Vec<(PatchField, &str)> {
        [
            (PatchField::Name, &self.name),
            (PatchField::LastName, &self.last_name),
            (PatchField::Avatar, &self.avatar),
            (PatchField::Banner, &self.banner),
            (PatchField::Biography, &self.biography),
            (PatchField::Location, &self.location),
            (PatchField::WebSite, &self.web_site),
        ]
        .into_iter()
        .filter_map(|(field, value)| match value.as_deref() {
            Some(text) if !text.is_empty() => Some((field, text)),
            _ => None,
        })
        .collect()
    }

    /// Birth date to apply; the zero instant counts as absent.
    pub fn birth_date(&self) -> Option<DateTime<Utc>> {
        self.birth_date
            .filter(|date| *date != DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn is_empty(&self) -> bool {
        self.text_fields().is_empty() && self.birth_date().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(skip)]
    pub active: bool,
}

/// A post about to be persisted. `date` is assigned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTweet {
    pub user_id: String,
    pub message: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub user_id: String,
    pub user_relation_id: String,
    #[serde(skip)]
    pub active: bool,
}

/// Post body carried inside a timeline triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TweetBody {
    pub id: String,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
}

/// Timeline item attributing a post to who follows and who wrote it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTweet {
    /// The reader (owner of the following edge).
    pub user_id: String,
    /// The followed author of the post.
    pub user_relation_id: String,
    pub tweet: TweetBody,
}

impl From<UserTweet> for Tweet {
    fn from(item: UserTweet) -> Self {
        Tweet {
            id: item.tweet.id,
            user_id: item.user_relation_id,
            message: item.tweet.message,
            date: item.tweet.date,
            active: true,
        }
    }
}

/// One window of a paginated query plus the size of the whole result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Page { items, total }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

/// Output of the timeline fan-out in either of its two shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Timeline {
    Tweets(Page<Tweet>),
    UserTweets(Page<UserTweet>),
}

impl Timeline {
    pub fn total(&self) -> u64 {
        match self {
            Timeline::Tweets(page) => page.total,
            Timeline::UserTweets(page) => page.total,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Timeline::Tweets(page) => page.items.len(),
            Timeline::UserTweets(page) => page.items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which side of the follow graph a user listing walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSet {
    /// Users with an active edge into the subject.
    Followers,
    /// Users the subject actively follows.
    Following,
    /// Everyone except the subject and the users it follows.
    NotFollowing,
}

/// Discriminator of the composite `/users` listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsersKind {
    New,
    Follow,
}

impl UsersKind {
    pub fn user_set(self) -> UserSet {
        match self {
            UsersKind::New => UserSet::NotFollowing,
            UsersKind::Follow => UserSet::Following,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn full_user() -> User {
        User {
            id: "7".into(),
            name: "Ada".into(),
            last_name: "Lovelace".into(),
            birth_date: Utc.with_ymd_and_hms(1815, 12, 10, 0, 0, 0).unwrap(),
            email: "ada@example.com".into(),
            password: "$2b$08$hash".into(),
            avatar: "a.png".into(),
            banner: "b.png".into(),
            biography: "engines".into(),
            location: "London".into(),
            web_site: "https://example.com".into(),
        }
    }

    #[test]
    fn public_projection_keeps_identity_only() {
        let projected = full_user().public_projection();
        assert_eq!(projected.id, "7");
        assert_eq!(projected.name, "Ada");
        assert_eq!(projected.last_name, "Lovelace");
        assert!(projected.email.is_empty());
        assert!(projected.password.is_empty());
        assert!(projected.biography.is_empty());
        assert!(projected.web_site.is_empty());
    }

    #[test]
    fn password_is_never_serialized() {
        let json = serde_json::to_value(full_user()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["lastName"], "Lovelace");
        assert_eq!(json["webSite"], "https://example.com");
    }

    #[test]
    fn password_is_accepted_on_input() {
        let user: User = serde_json::from_str(
            r#"{"name":"Bob","email":"bob@example.com","password":"secret1"}"#,
        )
        .unwrap();
        assert_eq!(user.password, "secret1");
        assert_eq!(user.birth_date, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn patch_skips_empty_fields() {
        let patch = UserPatch {
            name: Some("Grace".into()),
            last_name: Some(String::new()),
            location: Some("Arlington".into()),
            birth_date: Some(DateTime::<Utc>::UNIX_EPOCH),
            ..UserPatch::default()
        };
        assert_eq!(
            patch.text_fields(),
            vec![(PatchField::Name, "Grace"), (PatchField::Location, "Arlington")]
        );
        assert_eq!(patch.birth_date(), None);
        assert!(!patch.is_empty());
        assert!(UserPatch::default().is_empty());
    }

    #[test]
    fn user_tweet_flattens_to_the_author_tweet() {
        let date = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let item = UserTweet {
            user_id: "1".into(),
            user_relation_id: "2".into(),
            tweet: TweetBody {
                id: "9".into(),
                message: "hello".into(),
                date,
            },
        };
        let tweet = Tweet::from(item);
        assert_eq!(tweet.user_id, "2");
        assert_eq!(tweet.id, "9");
        assert_eq!(tweet.date, date);
    }

    #[test]
    fn users_kind_maps_to_the_dedicated_listing() {
        let kind: UsersKind = serde_json::from_str("\"new\"").unwrap();
        assert_eq!(kind.user_set(), UserSet::NotFollowing);
        assert_eq!(UsersKind::Follow.user_set(), UserSet::Following);
    }
}
