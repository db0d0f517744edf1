//! Behavioural scenarios every storage backend must pass.
//!
//! Each scenario expects an empty store and creates the users it needs.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::BoxFuture;

use twittor::db::{Backend, Pagination, StorageAdapter, UserQuery};
use twittor::error::StoreError;
use twittor::models::{NewTweet, Timeline, User, UserPatch, UsersKind};

static NEXT: AtomicUsize = AtomicUsize::new(0);

pub const PASSWORD: &str = "secret1";

/// Counts the stored edges for a (source, target) pair, bypassing the adapter.
pub type EdgeCount = Box<dyn Fn(&str, &str) -> BoxFuture<'static, u64> + Send + Sync>;

fn birth(year: i32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, 6, 15, 0, 0, 0).unwrap()
}

fn base_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A well-formed identifier that names nothing in the store.
pub fn missing_id(store: &dyn StorageAdapter) -> &'static str {
    match store.backend() {
        Backend::Relational => "987654321",
        _ => "0123456789abcdef01234567",
    }
}

pub async fn register(store: &dyn StorageAdapter, name: &str, year: i32) -> String {
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    store
        .insert_user(User {
            name: name.to_string(),
            last_name: format!("{name}son"),
            birth_date: birth(year),
            email: format!("{}.{n}@example.com", name.to_lowercase()),
            password: PASSWORD.to_string(),
            biography: format!("{name} writes here"),
            ..User::default()
        })
        .await
        .unwrap()
}

async fn post(store: &dyn StorageAdapter, user: &str, message: &str, minutes: i64) -> String {
    store
        .insert_tweet(NewTweet {
            user_id: user.to_string(),
            message: message.to_string(),
            date: base_date() + Duration::minutes(minutes),
        })
        .await
        .unwrap()
}

fn query(page: u64, limit: u64, search: &str) -> UserQuery {
    UserQuery::new(page, limit, search)
}

fn ids(users: &[User]) -> Vec<String> {
    users.iter().map(|u| u.id.clone()).collect()
}

pub async fn registration_and_login(store: &dyn StorageAdapter) {
    let id = register(store, "Ada", 1990).await;
    let profile = store.get_profile(&id).await.unwrap().unwrap();
    let email = profile.email.clone();
    assert_eq!(profile.id, id);
    assert_eq!(profile.name, "Ada");
    assert!(profile.password.is_empty());
    assert_eq!(profile.birth_date, birth(1990));

    let stored = store.is_user(&email).await.unwrap().unwrap();
    assert_ne!(stored.password, PASSWORD);
    assert!(stored.password.starts_with("$2"));

    let logged = store.try_login(&email, PASSWORD).await.unwrap().unwrap();
    assert_eq!(logged.id, id);
    assert!(logged.password.is_empty());
    assert!(store.try_login(&email, "wrong-pass").await.unwrap().is_none());
    assert!(store
        .try_login("nobody@example.com", PASSWORD)
        .await
        .unwrap()
        .is_none());

    let duplicate = store
        .insert_user(User {
            name: "Other".into(),
            email: email.clone(),
            password: PASSWORD.into(),
            ..User::default()
        })
        .await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateEmail(_))));

    assert!(store.get_profile(missing_id(store)).await.unwrap().is_none());
    assert!(matches!(
        store.get_profile("not-an-id").await,
        Err(StoreError::InvalidId(_))
    ));
}

pub async fn sparse_profile_update(store: &dyn StorageAdapter) {
    let id = register(store, "Grace", 1985).await;
    let patch = UserPatch {
        name: Some("Grace B".into()),
        location: Some("Arlington".into()),
        biography: Some(String::new()),
        ..UserPatch::default()
    };
    store.modify_registry(&id, &patch).await.unwrap();

    let profile = store.get_profile(&id).await.unwrap().unwrap();
    assert_eq!(profile.name, "Grace B");
    assert_eq!(profile.location, "Arlington");
    assert_eq!(profile.last_name, "Graceson");
    assert_eq!(profile.biography, "Grace writes here");
    assert_eq!(profile.birth_date, birth(1985));

    let moved = UserPatch {
        birth_date: Some(birth(1986)),
        ..UserPatch::default()
    };
    store.modify_registry(&id, &moved).await.unwrap();
    assert_eq!(
        store.get_profile(&id).await.unwrap().unwrap().birth_date,
        birth(1986)
    );

    store.modify_registry(&id, &UserPatch::default()).await.unwrap();
    assert!(matches!(
        store.modify_registry(missing_id(store), &patch).await,
        Err(StoreError::NotFound { .. })
    ));
}

pub async fn tweet_lifecycle(store: &dyn StorageAdapter) {
    let author = register(store, "Ann", 1990).await;
    let other = register(store, "Bob", 1991).await;

    let first = post(store, &author, "first", 1).await;
    let second = post(store, &author, "second", 2).await;
    let third = post(store, &author, "third", 3).await;

    let page = store.get_tweets(&author, Pagination::new(1, 10)).await.unwrap();
    assert_eq!(page.total, 3);
    let listed: Vec<_> = page.items.iter().map(|t| t.id.clone()).collect();
    assert_eq!(listed, vec![third.clone(), second.clone(), first.clone()]);
    assert!(page.items.iter().all(|t| t.user_id == author));

    let window = store.get_tweets(&author, Pagination::new(2, 2)).await.unwrap();
    assert_eq!(window.total, 3);
    assert_eq!(window.items.len(), 1);
    assert_eq!(window.items[0].id, first);

    let blank = store
        .insert_tweet(NewTweet {
            user_id: author.clone(),
            message: "   ".into(),
            date: base_date(),
        })
        .await;
    assert!(matches!(blank, Err(StoreError::EmptyMessage)));

    assert!(matches!(
        store.delete_tweet(&second, &other).await,
        Err(StoreError::NotOwner)
    ));
    assert_eq!(
        store.get_tweets(&author, Pagination::new(1, 10)).await.unwrap().total,
        3
    );

    store.delete_tweet(&second, &author).await.unwrap();
    let page = store.get_tweets(&author, Pagination::new(1, 10)).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(page.items.iter().all(|t| t.id != second));

    assert!(matches!(
        store.delete_tweet(missing_id(store), &author).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(store
        .get_tweets(&other, Pagination::new(1, 10))
        .await
        .unwrap()
        .items
        .is_empty());
}

async fn assert_single_edge(edges: Option<&EdgeCount>, source: &str, target: &str) {
    if let Some(count) = edges {
        assert_eq!(count(source, target).await, 1, "duplicate edge for {source} -> {target}");
    }
}

pub async fn relation_lifecycle(store: &dyn StorageAdapter, edges: Option<&EdgeCount>) {
    let a = register(store, "Ann", 1990).await;
    let b = register(store, "Bob", 1991).await;

    assert!(matches!(
        store.insert_relation(&a, &a).await,
        Err(StoreError::SelfRelation)
    ));
    assert!(store.is_relation(&a, &a).await.unwrap().is_none());
    assert!(matches!(
        store.insert_relation(&a, missing_id(store)).await,
        Err(StoreError::TargetNotFound(_))
    ));

    store.insert_relation(&a, &b).await.unwrap();
    let edge = store.is_relation(&a, &b).await.unwrap().unwrap();
    assert!(edge.active);
    assert_eq!(edge.user_id, a);
    assert_eq!(edge.user_relation_id, b);
    assert!(store.is_relation(&b, &a).await.unwrap().is_none());

    assert!(matches!(
        store.insert_relation(&a, &b).await,
        Err(StoreError::AlreadyActive(_))
    ));
    assert_single_edge(edges, &a, &b).await;

    store.delete_relation(&a, &b).await.unwrap();
    let after = store.is_relation(&a, &b).await.unwrap();
    if store.backend().keeps_inactive_edges() {
        assert!(!after.unwrap().active);
    } else {
        assert!(after.is_none());
    }
    store.delete_relation(&a, &b).await.unwrap();
    store.delete_relation(&b, &a).await.unwrap();

    store.insert_relation(&a, &b).await.unwrap();
    assert!(store.is_relation(&a, &b).await.unwrap().unwrap().active);
    assert_single_edge(edges, &a, &b).await;
}

pub async fn physical_deletes(store: &dyn StorageAdapter) {
    let a = register(store, "Ann", 1990).await;
    let b = register(store, "Bob", 1991).await;
    let kept = post(store, &a, "kept", 1).await;
    let gone = post(store, &a, "gone", 2).await;

    assert!(matches!(
        store.purge_tweet(&gone, &b).await,
        Err(StoreError::NotOwner)
    ));
    store.purge_tweet(&gone, &a).await.unwrap();
    let page = store.get_tweets(&a, Pagination::new(1, 10)).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, kept);
    assert!(matches!(
        store.delete_tweet(&gone, &a).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.purge_tweet(&gone, &a).await,
        Err(StoreError::NotFound { .. })
    ));

    store.insert_relation(&a, &b).await.unwrap();
    store.purge_relation(&a, &b).await.unwrap();
    assert!(store.is_relation(&a, &b).await.unwrap().is_none());
    assert_eq!(store.get_following(&a, &query(1, 10, "")).await.unwrap().total, 0);
    store.purge_relation(&a, &b).await.unwrap();
    store.purge_relation(&b, &a).await.unwrap();

    store.insert_relation(&a, &b).await.unwrap();
    let following = store.get_following(&a, &query(1, 10, "")).await.unwrap();
    assert_eq!(ids(&following.items), vec![b.clone()]);
}

pub async fn listing_for_unknown_subject(store: &dyn StorageAdapter) {
    let a = register(store, "Ann", 1990).await;
    let b = register(store, "Bob", 1991).await;
    store.insert_relation(&a, &b).await.unwrap();
    let ghost = missing_id(store);

    let strangers = store.get_not_following(ghost, &query(1, 10, "")).await.unwrap();
    assert_eq!(strangers.total, 2);
    let listed: BTreeSet<String> = ids(&strangers.items).into_iter().collect();
    assert_eq!(listed, [a, b].into_iter().collect());

    let following = store.get_following(ghost, &query(1, 10, "")).await.unwrap();
    assert!(following.items.is_empty());
    assert_eq!(following.total, 0);
}

pub async fn user_listings(store: &dyn StorageAdapter) {
    let a = register(store, "Ann", 1990).await;
    let b = register(store, "Bob", 1980).await;
    let c = register(store, "Cid", 2000).await;
    let d = register(store, "Dee", 1970).await;
    let e = register(store, "Eve", 1995).await;

    store.insert_relation(&a, &b).await.unwrap();
    store.insert_relation(&a, &c).await.unwrap();
    store.insert_relation(&d, &a).await.unwrap();
    store.insert_relation(&a, &e).await.unwrap();
    store.delete_relation(&a, &e).await.unwrap();

    let followers = store.get_followers(&a, &query(1, 10, "")).await.unwrap();
    assert_eq!(ids(&followers.items), vec![d.clone()]);
    assert_eq!(followers.total, 1);

    let following = store.get_following(&a, &query(1, 10, "")).await.unwrap();
    assert_eq!(ids(&following.items), vec![c.clone(), b.clone()]);
    assert_eq!(following.total, 2);
    for user in &following.items {
        assert!(user.email.is_empty());
        assert!(user.password.is_empty());
        assert!(user.biography.is_empty());
        assert!(!user.name.is_empty());
        assert!(!user.last_name.is_empty());
    }

    let not_following = store.get_not_following(&a, &query(1, 10, "")).await.unwrap();
    assert_eq!(ids(&not_following.items), vec![e.clone(), d.clone()]);
    assert_eq!(not_following.total, 2);

    let mut union: BTreeSet<String> = ids(&following.items).into_iter().collect();
    for id in ids(&not_following.items) {
        assert!(union.insert(id), "following and not-following overlap");
    }
    assert!(union.insert(a.clone()));
    let everyone: BTreeSet<String> = [&a, &b, &c, &d, &e].into_iter().cloned().collect();
    assert_eq!(union, everyone);

    let via_new = store.get_users(&a, &query(1, 10, ""), UsersKind::New).await.unwrap();
    assert_eq!(via_new, not_following);
    let via_follow = store
        .get_users(&a, &query(1, 10, ""), UsersKind::Follow)
        .await
        .unwrap();
    assert_eq!(via_follow, following);

    let searched = store.get_following(&a, &query(1, 10, "BO")).await.unwrap();
    assert_eq!(ids(&searched.items), vec![b.clone()]);
    assert_eq!(searched.total, 1);

    let first = store.get_following(&a, &query(1, 1, "")).await.unwrap();
    let second = store.get_following(&a, &query(2, 1, "")).await.unwrap();
    assert_eq!(ids(&first.items), vec![c.clone()]);
    assert_eq!(ids(&second.items), vec![b.clone()]);
    assert_eq!(first.total, 2);
    assert_eq!(second.total, 2);

    let beyond = store.get_following(&a, &query(5, 10, "")).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 2);
}

pub async fn search_is_literal(store: &dyn StorageAdapter) {
    let viewer = register(store, "Viewer", 1990).await;
    let dotted = register(store, "A.b", 1991).await;
    let _plain = register(store, "Axb", 1992).await;

    let found = store
        .get_not_following(&viewer, &query(1, 10, "a.b"))
        .await
        .unwrap();
    assert_eq!(ids(&found.items), vec![dotted]);
    assert_eq!(found.total, 1);

    let none = store
        .get_not_following(&viewer, &query(1, 10, "(.*"))
        .await
        .unwrap();
    assert!(none.items.is_empty());
    assert_eq!(none.total, 0);
}

pub async fn following_timeline(store: &dyn StorageAdapter) {
    let a = register(store, "Ann", 1990).await;
    let b = register(store, "Bob", 1991).await;
    let c = register(store, "Cid", 1992).await;
    let d = register(store, "Dee", 1993).await;

    store.insert_relation(&a, &b).await.unwrap();
    store.insert_relation(&a, &c).await.unwrap();

    let b1 = post(store, &b, "b1", 10).await;
    let b2 = post(store, &b, "b2", 30).await;
    let b3 = post(store, &b, "b3", 50).await;
    let c1 = post(store, &c, "c1", 20).await;
    let c2 = post(store, &c, "c2", 40).await;
    let c3 = post(store, &c, "c3", 60).await;
    post(store, &d, "unfollowed", 70).await;
    post(store, &a, "own", 80).await;
    store.delete_tweet(&b3, &b).await.unwrap();
    store.delete_tweet(&c3, &c).await.unwrap();

    let only = store
        .get_following_tweets(&a, Pagination::new(1, 10), true)
        .await
        .unwrap();
    let Timeline::Tweets(page) = only else {
        panic!("expected flattened tweets");
    };
    assert_eq!(page.total, 4);
    let listed: Vec<_> = page.items.iter().map(|t| t.id.clone()).collect();
    assert_eq!(listed, vec![c2.clone(), b2.clone(), c1.clone(), b1.clone()]);
    assert_eq!(page.items[0].user_id, c);
    assert_eq!(page.items[1].user_id, b);

    let triples = store
        .get_following_tweets(&a, Pagination::new(1, 10), false)
        .await
        .unwrap();
    let Timeline::UserTweets(triples) = triples else {
        panic!("expected reader/author triples");
    };
    assert_eq!(triples.total, 4);
    assert!(triples.items.iter().all(|item| item.user_id == a));
    assert_eq!(triples.items[0].user_relation_id, c);
    assert_eq!(triples.items[0].tweet.message, "c2");

    let wide = store
        .get_following_tweets(&a, Pagination::new(1, 4), true)
        .await
        .unwrap();
    let narrow = store
        .get_following_tweets(&a, Pagination::new(2, 2), true)
        .await
        .unwrap();
    let (Timeline::Tweets(wide), Timeline::Tweets(narrow)) = (wide, narrow) else {
        panic!("expected flattened tweets");
    };
    assert_eq!(narrow.items, wide.items[2..].to_vec());
    assert_eq!(narrow.total, wide.total);

    store.delete_relation(&a, &c).await.unwrap();
    let after = store
        .get_following_tweets(&a, Pagination::new(1, 10), true)
        .await
        .unwrap();
    assert_eq!(after.total(), 2);
    assert_eq!(after.len(), 2);

    let lonely = store
        .get_following_tweets(&d, Pagination::new(1, 10), true)
        .await
        .unwrap();
    assert!(lonely.is_empty());
    assert_eq!(lonely.total(), 0);
}
