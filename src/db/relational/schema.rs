//! Idempotent DDL applied on connect.

pub(crate) const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        birth_date INTEGER NOT NULL DEFAULT 0,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        avatar TEXT NOT NULL DEFAULT '',
        banner TEXT NOT NULL DEFAULT '',
        biography TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        web_site TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS tweets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users (id),
        message TEXT NOT NULL,
        date INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS tweets_owner_active_date ON tweets (user_id, active, date)",
    "CREATE TABLE IF NOT EXISTS relations (
        user_id INTEGER NOT NULL REFERENCES users (id),
        following_id INTEGER NOT NULL REFERENCES users (id),
        active INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (user_id, following_id)
    )",
    "CREATE INDEX IF NOT EXISTS relations_following ON relations (following_id, active)",
];
