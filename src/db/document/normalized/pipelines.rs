//! Aggregation pipelines over `users`, `tweet` and `relation`.

use mongodb::bson::{doc, oid::ObjectId, Document};

use super::{RELATIONS, TWEETS, USERS};
use crate::db::document::{name_filter, summary_projection, PagedPipeline};

fn by_birth_date(prefix: &str) -> Document {
    let mut sort = Document::new();
    sort.insert(format!("{prefix}.birthDate"), -1);
    sort.insert(format!("{prefix}._id"), -1);
    sort
}

/// `match(edge, active)` -> `lookup(users)` -> flatten -> `match(name)`.
fn edge_listing(edge: Document, joined_field: &str, search: &str) -> PagedPipeline {
    PagedPipeline::new(
        vec![
            doc! { "$match": edge },
            doc! { "$lookup": {
                "from": USERS,
                "localField": joined_field,
                "foreignField": "_id",
                "as": "result",
            } },
            doc! { "$project": {
                "user": { "$arrayElemAt": ["$result", 0] },
                "_id": 0,
            } },
            doc! { "$match": name_filter("user.name", search) },
        ],
        by_birth_date("user"),
    )
    .project(summary_projection("user"))
}

/// Users with an active edge pointing at `user`.
pub(crate) fn followers(user: ObjectId, search: &str) -> PagedPipeline {
    edge_listing(
        doc! { "userRelationId": user, "active": true },
        "userId",
        search,
    )
}

/// Users `user` actively follows.
pub(crate) fn following(user: ObjectId, search: &str) -> PagedPipeline {
    edge_listing(
        doc! { "userId": user, "active": true },
        "userRelationId",
        search,
    )
}

/// Every user outside `user`'s active following set, `user` excluded.
///
/// Runs against `users`. Each candidate looks up the one edge `user` may hold
/// towards it and survives only when there is none, so no document ever
/// carries more than a single joined edge.
pub(crate) fn not_following(user: ObjectId, search: &str) -> PagedPipeline {
    let mut candidate = name_filter("name", search);
    candidate.insert("_id", doc! { "$ne": user });

    PagedPipeline::new(
        vec![
            doc! { "$match": candidate },
            doc! { "$lookup": {
                "from": RELATIONS,
                "localField": "_id",
                "foreignField": "userRelationId",
                "as": "edge",
                "pipeline": [
                    { "$match": { "userId": user, "active": true } },
                    { "$limit": 1 },
                ],
            } },
            doc! { "$match": { "edge": { "$size": 0 } } },
        ],
        doc! { "birthDate": -1, "_id": -1 },
    )
    .project(doc! { "_id": 1, "name": 1, "lastName": 1, "birthDate": 1 })
}

/// Active posts of every user `user` actively follows, one row per post.
pub(crate) fn timeline(user: ObjectId) -> PagedPipeline {
    PagedPipeline::new(
        vec![
            doc! { "$match": { "userId": user, "active": true } },
            doc! { "$lookup": {
                "from": TWEETS,
                "localField": "userRelationId",
                "foreignField": "userId",
                "as": "tweet",
                "pipeline": [{ "$match": { "active": true } }],
            } },
            doc! { "$unwind": { "path": "$tweet", "preserveNullAndEmptyArrays": false } },
        ],
        doc! { "tweet.date": -1, "tweet._id": -1 },
    )
    .project(doc! {
        "_id": 0,
        "userId": 1,
        "userRelationId": 1,
        "tweet._id": 1,
        "tweet.message": 1,
        "tweet.date": 1,
    })
}
