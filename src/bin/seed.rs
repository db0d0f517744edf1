use chrono::{Duration, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Sentence;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use std::error::Error;

use twittor::config::StorageConfig;
use twittor::db::{self, StorageAdapter};
use twittor::error::StoreError;
use twittor::models::{NewTweet, User};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    println!("Starting data seeding...");

    let config = StorageConfig::from_env()?;
    let store = db::connect(&config).await?;
    println!("Connected to the {} backend", store.backend());

    // Configuration
    let num_users = 100;
    let tweets_per_user = 20;
    let follows_per_user = 10;

    let users = seed_users(store.as_ref(), num_users).await?;
    seed_tweets(store.as_ref(), &users, tweets_per_user).await?;
    seed_relations(store.as_ref(), &users, follows_per_user).await?;

    println!("Seeding completed!");
    Ok(())
}

async fn seed_users(store: &dyn StorageAdapter, count: usize) -> Result<Vec<String>, Box<dyn Error>> {
    println!("Creating {} users...", count);
    let mut users = Vec::with_capacity(count);

    for i in 0..count {
        let email: String = SafeEmail().fake();
        let age_days: i64 = (18 * 365..80 * 365).fake();
        let user = User {
            name: FirstName().fake(),
            last_name: LastName().fake(),
            birth_date: Utc::now() - Duration::days(age_days),
            email: format!("{i}.{email}"),
            password: "password123".to_string(),
            biography: Sentence(3..8).fake(),
            ..User::default()
        };
        let name = format!("{} {}", user.name, user.last_name);

        let user_id = store.insert_user(user).await?;
        println!("Created user {}/{}: {} ({})", i + 1, count, name, user_id);
        users.push(user_id);
    }

    Ok(users)
}

async fn seed_tweets(
    store: &dyn StorageAdapter,
    users: &[String],
    tweets_per_user: usize,
) -> Result<(), Box<dyn Error>> {
    println!("Creating {} tweets per user...", tweets_per_user);
    let total_tweets = users.len() * tweets_per_user;
    let mut current_tweet = 0;

    for user_id in users {
        for _ in 0..tweets_per_user {
            let minutes_ago: i64 = (0..60 * 24 * 30).fake();
            store
                .insert_tweet(NewTweet {
                    user_id: user_id.clone(),
                    message: Sentence(3..10).fake(),
                    date: Utc::now() - Duration::minutes(minutes_ago),
                })
                .await?;

            current_tweet += 1;
            if current_tweet % 100 == 0 {
                println!("Created {}/{} tweets", current_tweet, total_tweets);
            }
        }
    }

    Ok(())
}

async fn seed_relations(
    store: &dyn StorageAdapter,
    users: &[String],
    follows_per_user: usize,
) -> Result<(), Box<dyn Error>> {
    if users.len() < 2 {
        return Ok(());
    }
    println!("Creating up to {} follows per user...", follows_per_user);
    let mut created = 0;

    for source in users {
        for _ in 0..follows_per_user {
            let target = &users[(0..users.len()).fake::<usize>()];
            match store.insert_relation(source, target).await {
                Ok(()) => created += 1,
                Err(StoreError::SelfRelation | StoreError::AlreadyActive(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    println!("Created {} follow relations", created);
    Ok(())
}
