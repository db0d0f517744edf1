//! Aggregation pipelines over the single `users` collection.

use mongodb::bson::{doc, oid::ObjectId, Document};

use super::USERS;
use crate::db::document::{name_filter, summary_projection, PagedPipeline};

fn by_birth_date(prefix: &str) -> Document {
    let mut sort = Document::new();
    sort.insert(format!("{prefix}.birthDate"), -1);
    sort.insert(format!("{prefix}._id"), -1);
    sort
}

fn summary_fields() -> Document {
    doc! { "_id": 1, "name": 1, "lastName": 1, "birthDate": 1 }
}

/// Active posts embedded in `user`'s document.
pub(crate) fn own_tweets(user: ObjectId) -> PagedPipeline {
    PagedPipeline::new(
        vec![
            doc! { "$match": { "_id": user } },
            doc! { "$project": { "t": "$tweets" } },
            doc! { "$unwind": { "path": "$t", "preserveNullAndEmptyArrays": false } },
            doc! { "$match": { "t.active": true } },
        ],
        doc! { "t.date": -1, "t._id": -1 },
    )
    .project(doc! {
        "_id": "$t._id",
        "userId": "$_id",
        "message": "$t.message",
        "date": "$t.date",
        "active": "$t.active",
    })
}

/// Users whose `following` array holds `user`.
pub(crate) fn followers(user: ObjectId, search: &str) -> PagedPipeline {
    let mut matched = name_filter("name", search);
    matched.insert("following", user);

    PagedPipeline::new(
        vec![doc! { "$match": matched }],
        doc! { "birthDate": -1, "_id": -1 },
    )
    .project(summary_fields())
}

/// Users listed in `user`'s `following` array.
pub(crate) fn following(user: ObjectId, search: &str) -> PagedPipeline {
    PagedPipeline::new(
        vec![
            doc! { "$match": { "_id": user } },
            doc! { "$lookup": {
                "from": USERS,
                "localField": "following",
                "foreignField": "_id",
                "as": "u",
                "pipeline": [{ "$project": summary_fields() }],
            } },
            doc! { "$unwind": { "path": "$u", "preserveNullAndEmptyArrays": false } },
            doc! { "$match": name_filter("u.name", search) },
        ],
        by_birth_date("u"),
    )
    .project(summary_projection("u"))
}

/// Users absent from `user`'s `following` array, `user` excluded.
///
/// Runs over every other user; each one checks `user`'s document for its own
/// id, so a missing subject leaves everybody as a candidate.
pub(crate) fn not_following(user: ObjectId, search: &str) -> PagedPipeline {
    let mut candidate = name_filter("name", search);
    candidate.insert("_id", doc! { "$ne": user });

    PagedPipeline::new(
        vec![
            doc! { "$match": candidate },
            doc! { "$project": summary_fields() },
            doc! { "$lookup": {
                "from": USERS,
                "as": "edge",
                "let": { "candidate": "$_id" },
                "pipeline": [
                    { "$match": { "_id": user } },
                    { "$match": { "$expr": {
                        "$in": ["$$candidate", { "$ifNull": ["$following", []] }],
                    } } },
                    { "$project": { "_id": 1 } },
                ],
            } },
            doc! { "$match": { "edge": { "$size": 0 } } },
        ],
        doc! { "birthDate": -1, "_id": -1 },
    )
    .project(summary_fields())
}

/// Active posts of every followed user, as `{userId, userRelationId, tweet}`.
pub(crate) fn timeline(user: ObjectId) -> PagedPipeline {
    PagedPipeline::new(
        vec![
            doc! { "$match": { "_id": user } },
            doc! { "$lookup": {
                "from": USERS,
                "localField": "following",
                "foreignField": "_id",
                "as": "r",
            } },
            doc! { "$unwind": { "path": "$r", "preserveNullAndEmptyArrays": false } },
            doc! { "$project": {
                "_id": 0,
                "userId": "$_id",
                "userRelationId": "$r._id",
                "tweet": { "$filter": {
                    "input": "$r.tweets",
                    "as": "tweet",
                    "cond": { "$eq": ["$$tweet.active", true] },
                } },
            } },
            doc! { "$unwind": { "path": "$tweet", "preserveNullAndEmptyArrays": false } },
        ],
        doc! { "tweet.date": -1, "tweet._id": -1 },
    )
    .project(doc! {
        "userId": 1,
        "userRelationId": 1,
        "tweet._id": 1,
        "tweet.message": 1,
        "tweet.date": 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pagination;

    #[test]
    fn own_tweets_filter_inactive_posts_before_counting() {
        let pipeline = own_tweets(ObjectId::new());
        let count = pipeline.count_pipeline();
        assert_eq!(count[3], doc! { "$match": { "t.active": true } });
        assert_eq!(count.last().unwrap(), &doc! { "$count": "total" });
    }

    #[test]
    fn followers_scan_the_following_arrays() {
        let user = ObjectId::new();
        let pipeline = followers(user, "");
        let matched = pipeline.base[0].get_document("$match").unwrap();
        assert_eq!(matched.get_object_id("following").unwrap(), user);
        assert!(matched.get_document("name").is_ok());
    }

    #[test]
    fn not_following_tolerates_a_missing_array() {
        let user = ObjectId::new();
        let pipeline = not_following(user, "");
        let first = pipeline.base[0].get_document("$match").unwrap();
        assert_eq!(first.get_document("_id").unwrap().get_object_id("$ne").unwrap(), user);
        let lookup = pipeline.base[2].get_document("$lookup").unwrap();
        let inner = lookup.get_array("pipeline").unwrap();
        let filter = inner[1].as_document().unwrap().get_document("$match").unwrap();
        let membership = filter.get_document("$expr").unwrap().get_array("$in").unwrap();
        assert!(membership[1].as_document().unwrap().contains_key("$ifNull"));
        assert_eq!(pipeline.base[3], doc! { "$match": { "edge": { "$size": 0 } } });
    }

    #[test]
    fn following_unwinds_right_after_the_lookup() {
        let pipeline = following(ObjectId::new(), "");
        let lookup = pipeline.base[1].get_document("$lookup").unwrap();
        assert_eq!(lookup.get_str("as").unwrap(), "u");
        assert_eq!(
            pipeline.base[2],
            doc! { "$unwind": { "path": "$u", "preserveNullAndEmptyArrays": false } }
        );
    }

    #[test]
    fn timeline_sorts_and_pages_after_the_unwind() {
        let page = timeline(ObjectId::new()).page_pipeline(Pagination::new(2, 4));
        assert_eq!(page[4], doc! { "$unwind": { "path": "$tweet", "preserveNullAndEmptyArrays": false } });
        assert_eq!(page[5], doc! { "$sort": { "tweet.date": -1, "tweet._id": -1 } });
        assert_eq!(page[6], doc! { "$skip": 4_i64 });
        assert_eq!(page[7], doc! { "$limit": 4_i64 });
    }
}
