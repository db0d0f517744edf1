//! SQL backend on SQLite through `sqlx`.
//!
//! Users, tweets and relations live in three tables; relation edges are keyed
//! by `(user_id, following_id)` and soft-deleted through their `active` flag.
//! Every write is a single statement, so concurrent writers only ever wait on
//! SQLite's busy handler.

mod mappers;
mod schema;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use self::mappers::{
    parse_id, to_millis, RelationRow, TimelineRow, TweetRow, UserRow, UserSummaryRow,
};
use crate::config::StorageConfig;
use crate::db::{bounded, deadline, Backend, Pagination, StorageAdapter, UserQuery};
use crate::error::{StoreError, StoreResult};
use crate::models::{NewTweet, Page, Relation, Tweet, User, UserPatch, UserSet, UserTweet};

const USER_COLUMNS: &str = "id, name, last_name, birth_date, email, password, avatar, banner, \
                            biography, location, web_site";

const TIMELINE_FROM: &str = " FROM relations r \
                             JOIN tweets t ON t.user_id = r.following_id AND t.active = 1 \
                             WHERE r.active = 1 AND r.user_id = ";

pub struct RelationalStore {
    pool: SqlitePool,
    timeout: Duration,
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn total(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

fn push_window(qb: &mut QueryBuilder<'_, Sqlite>, pagination: Pagination) {
    qb.push(" LIMIT ");
    qb.push_bind(clamp_i64(pagination.limit));
    qb.push(" OFFSET ");
    qb.push_bind(clamp_i64(pagination.skip()));
}

/// `FROM ... WHERE ...` shared by the count and the page query of a listing.
fn push_user_listing(
    qb: &mut QueryBuilder<'_, Sqlite>,
    set: UserSet,
    user: i64,
    excluded: &[i64],
    search: &str,
) {
    match set {
        UserSet::Followers => {
            qb.push(
                " FROM relations r JOIN users u ON u.id = r.user_id \
                 WHERE r.active = 1 AND r.following_id = ",
            );
            qb.push_bind(user);
        }
        UserSet::Following => {
            qb.push(
                " FROM relations r JOIN users u ON u.id = r.following_id \
                 WHERE r.active = 1 AND r.user_id = ",
            );
            qb.push_bind(user);
        }
        UserSet::NotFollowing => {
            qb.push(" FROM users u WHERE u.id NOT IN (");
            let mut ids = qb.separated(", ");
            for id in excluded {
                ids.push_bind(*id);
            }
            qb.push(")");
        }
    }
    qb.push(" AND instr(lower(u.name), lower(");
    qb.push_bind(search.to_string());
    qb.push(")) > 0");
}

impl RelationalStore {
    pub async fn connect(config: &StorageConfig) -> StoreResult<Self> {
        let name = Backend::Relational.as_str();
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::connection(name, e))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.timeout);

        let pool_options = SqlitePoolOptions::new().acquire_timeout(config.timeout);
        // Every connection to `:memory:` opens its own database.
        let (pool_options, options) = if is_in_memory(&config.url) {
            let pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (pool_options, options)
        } else {
            (
                pool_options.max_connections(config.max_connections),
                options.journal_mode(SqliteJournalMode::Wal),
            )
        };

        let pool = deadline(config.timeout, "connect", pool_options.connect_with(options))
            .await?
            .map_err(|e| StoreError::connection(name, e))?;

        let store = RelationalStore {
            pool,
            timeout: config.timeout,
        };
        store
            .migrate()
            .await
            .map_err(|e| StoreError::connection(name, e))?;
        info!("connected to {} ({} backend)", config.url, name);
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in schema::STATEMENTS.iter().copied() {
            bounded(self.timeout, "create schema", sqlx::query(statement).execute(&self.pool)).await?;
        }
        Ok(())
    }

    /// Resolves a post the caller may delete.
    async fn owned_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<i64> {
        let id = parse_id(tweet_id)?;
        let caller = parse_id(caller_id)?;
        let owner = bounded(
            self.timeout,
            "find tweet",
            sqlx::query_scalar::<_, i64>("SELECT user_id FROM tweets WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;

        match owner {
            None => Err(StoreError::not_found("tweet")),
            Some(owner) if owner != caller => Err(StoreError::NotOwner),
            Some(_) => Ok(id),
        }
    }

    async fn count(&self, context: &'static str, mut qb: QueryBuilder<'_, Sqlite>) -> StoreResult<u64> {
        let count = bounded(
            self.timeout,
            context,
            qb.build_query_scalar::<i64>().fetch_one(&self.pool),
        )
        .await?;
        Ok(total(count))
    }
}

#[async_trait]
impl StorageAdapter for RelationalStore {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn is_connected(&self) -> bool {
        bounded(self.timeout, "ping", sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .is_ok()
    }

    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let id = parse_id(user_id)?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = bounded(
            self.timeout,
            "find user",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    async fn is_user(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let row = bounded(
            self.timeout,
            "find user by email",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(email)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    async fn create_user(&self, user: &User) -> StoreResult<String> {
        let inserted = deadline(self.timeout, "insert user", async {
            let done = sqlx::query(
                "INSERT INTO users (name, last_name, birth_date, email, password, avatar, \
                 banner, biography, location, web_site) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&user.name)
            .bind(&user.last_name)
            .bind(to_millis(user.birth_date))
            .bind(&user.email)
            .bind(&user.password)
            .bind(&user.avatar)
            .bind(&user.banner)
            .bind(&user.biography)
            .bind(&user.location)
            .bind(&user.web_site)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(done.last_insert_rowid())
        })
        .await?;

        match inserted {
            Ok(id) => Ok(id.to_string()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEmail(user.email.clone())),
            Err(e) => Err(StoreError::backend("insert user", e)),
        }
    }

    async fn modify_registry(&self, user_id: &str, patch: &UserPatch) -> StoreResult<()> {
        let id = parse_id(user_id)?;
        if patch.is_empty() {
            return match self.find_user(user_id).await? {
                Some(_) => Ok(()),
                None => Err(StoreError::not_found("user")),
            };
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        let mut assignments = qb.separated(", ");
        for (field, value) in patch.text_fields() {
            assignments.push(field.column());
            assignments.push_unseparated(" = ");
            assignments.push_bind_unseparated(value.to_string());
        }
        if let Some(date) = patch.birth_date() {
            assignments.push("birth_date = ");
            assignments.push_bind_unseparated(to_millis(date));
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let done = bounded(self.timeout, "modify registry", qb.build().execute(&self.pool)).await?;
        let affected = done.rows_affected();

        if affected == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }

    async fn create_tweet(&self, tweet: &NewTweet) -> StoreResult<String> {
        let owner = parse_id(&tweet.user_id)?;
        let inserted = deadline(self.timeout, "insert tweet", async {
            sqlx::query("INSERT INTO tweets (user_id, message, date, active) VALUES (?, ?, ?, 1)")
                .bind(owner)
                .bind(&tweet.message)
                .bind(to_millis(tweet.date))
                .execute(&self.pool)
                .await
        })
        .await?;

        match inserted {
            Ok(done) => Ok(done.last_insert_rowid().to_string()),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::not_found("user")),
            Err(e) => Err(StoreError::backend("insert tweet", e)),
        }
    }

    async fn get_tweets(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<Tweet>> {
        let owner = parse_id(user_id)?;
        let count = bounded(
            self.timeout,
            "count tweets",
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM tweets WHERE user_id = ? AND active = 1",
            )
            .bind(owner)
            .fetch_one(&self.pool),
        )
        .await?;

        let rows = bounded(
            self.timeout,
            "get tweets",
            sqlx::query_as::<_, TweetRow>(
                "SELECT id, user_id, message, date, active FROM tweets \
                 WHERE user_id = ? AND active = 1 \
                 ORDER BY date DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(owner)
            .bind(clamp_i64(pagination.limit))
            .bind(clamp_i64(pagination.skip()))
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(Page::new(rows.into_iter().map(Tweet::from).collect(), total(count)))
    }

    async fn delete_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()> {
        let id = self.owned_tweet(tweet_id, caller_id).await?;
        bounded(
            self.timeout,
            "delete tweet",
            sqlx::query("UPDATE tweets SET active = 0 WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn purge_tweet(&self, tweet_id: &str, caller_id: &str) -> StoreResult<()> {
        let id = self.owned_tweet(tweet_id, caller_id).await?;
        bounded(
            self.timeout,
            "purge tweet",
            sqlx::query("DELETE FROM tweets WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn is_relation(&self, source: &str, target: &str) -> StoreResult<Option<Relation>> {
        let (src, tgt) = (parse_id(source)?, parse_id(target)?);
        let row = bounded(
            self.timeout,
            "find relation",
            sqlx::query_as::<_, RelationRow>(
                "SELECT user_id, following_id, active FROM relations \
                 WHERE user_id = ? AND following_id = ?",
            )
            .bind(src)
            .bind(tgt)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(Relation::from))
    }

    async fn follow(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (parse_id(source)?, parse_id(target)?);
        let outcome = deadline(self.timeout, "insert relation", async {
            sqlx::query(
                "INSERT INTO relations (user_id, following_id, active) VALUES (?, ?, 1) \
                 ON CONFLICT (user_id, following_id) DO UPDATE SET active = 1 WHERE active = 0",
            )
            .bind(src)
            .bind(tgt)
            .execute(&self.pool)
            .await
        })
        .await?;

        match outcome {
            Ok(done) if done.rows_affected() > 0 => {
                debug!("{source} now follows {target}");
                Ok(())
            }
            Ok(_) => Err(StoreError::AlreadyActive(target.to_string())),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::not_found("user")),
            Err(e) => Err(StoreError::backend("insert relation", e)),
        }
    }

    async fn delete_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (parse_id(source)?, parse_id(target)?);
        bounded(
            self.timeout,
            "delete relation",
            sqlx::query("UPDATE relations SET active = 0 WHERE user_id = ? AND following_id = ?")
                .bind(src)
                .bind(tgt)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn purge_relation(&self, source: &str, target: &str) -> StoreResult<()> {
        let (src, tgt) = (parse_id(source)?, parse_id(target)?);
        bounded(
            self.timeout,
            "purge relation",
            sqlx::query("DELETE FROM relations WHERE user_id = ? AND following_id = ?")
                .bind(src)
                .bind(tgt)
                .execute(&self.pool),
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
        let user = parse_id(user_id)?;
        let mut excluded = vec![user];
        if set == UserSet::NotFollowing {
            let followed = bounded(
                self.timeout,
                "list followed ids",
                sqlx::query_scalar::<_, i64>(
                    "SELECT following_id FROM relations WHERE user_id = ? AND active = 1",
                )
                .bind(user)
                .fetch_all(&self.pool),
            )
            .await?;
            excluded.extend(followed);
        }

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        push_user_listing(&mut count, set, user, &excluded, &query.search);
        let total = self.count("count users", count).await?;

        let mut page = QueryBuilder::<Sqlite>::new("SELECT u.id, u.name, u.last_name, u.birth_date");
        push_user_listing(&mut page, set, user, &excluded, &query.search);
        page.push(" ORDER BY u.birth_date DESC, u.id DESC");
        push_window(&mut page, query.pagination);

        let rows = bounded(
            self.timeout,
            "list users",
            page.build_query_as::<UserSummaryRow>().fetch_all(&self.pool),
        )
        .await?;

        Ok(Page::new(rows.into_iter().map(User::from).collect(), total))
    }

    async fn timeline(&self, user_id: &str, pagination: Pagination) -> StoreResult<Page<UserTweet>> {
        let user = parse_id(user_id)?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        count.push(TIMELINE_FROM);
        count.push_bind(user);
        let total = self.count("count timeline", count).await?;

        let mut page = QueryBuilder::<Sqlite>::new(
            "SELECT r.user_id AS user_id, r.following_id AS following_id, \
             t.id AS tweet_id, t.message AS message, t.date AS date",
        );
        page.push(TIMELINE_FROM);
        page.push_bind(user);
        page.push(" ORDER BY t.date DESC, t.id DESC");
        push_window(&mut page, pagination);

        let rows = bounded(
            self.timeout,
            "get following tweets",
            page.build_query_as::<TimelineRow>().fetch_all(&self.pool),
        )
        .await?;

        Ok(Page::new(rows.into_iter().map(UserTweet::from).collect(), total))
    }
}
