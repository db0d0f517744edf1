use std::sync::LazyLock;

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use actix_web::{delete, get, post, put, web, HttpResponse, ResponseError};
use chrono::Utc;
use log::{debug, error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{Caller, JwtKeys};
use crate::db::{Pagination, SharedStore, UserQuery};
use crate::error::StoreError;
use crate::models::{NewTweet, Timeline, Tweet, User, UserPatch, UserTweet, UsersKind};

const MIN_PASSWORD_LEN: usize = 6;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid email or password")]
    BadCredentials,
    #[error("database unavailable")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Infrastructure detail never reaches the response body.
    fn is_redacted(&self) -> bool {
        match self {
            ApiError::Internal(_) => true,
            ApiError::Store(err) => !err.is_client_error(),
            _ => false,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::BadCredentials => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(err) => match err {
                StoreError::InvalidId(_) | StoreError::EmptyMessage | StoreError::SelfRelation => {
                    StatusCode::BAD_REQUEST
                }
                StoreError::NotOwner => StatusCode::FORBIDDEN,
                StoreError::NotFound { .. } | StoreError::TargetNotFound(_) => StatusCode::NOT_FOUND,
                StoreError::DuplicateEmail(_) | StoreError::AlreadyActive(_) => StatusCode::CONFLICT,
                StoreError::Connection { .. } | StoreError::Backend { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if self.is_redacted() {
            error!("request failed: {self}");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(serde_json::json!({ "message": message }))
    }
}

/// Request-independent settings the handlers read from app data.
#[derive(Debug, Clone, Copy)]
pub struct ApiConfig {
    pub records_limit: u64,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    id: Option<String>,
}

impl IdQuery {
    fn id(&self) -> Result<&str, ApiError> {
        required_id(self.id.as_deref())
    }
}

fn required_id(id: Option<&str>) -> Result<&str, ApiError> {
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ApiError::BadRequest("the id param is required".into())),
    }
}

#[derive(Debug, Deserialize)]
pub struct TweetsQuery {
    id: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    page: Option<String>,
    limit: Option<String>,
    #[serde(default)]
    search: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    page: Option<String>,
    limit: Option<String>,
    onlytweets: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct TweetRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: bool,
}

#[derive(Debug, Serialize)]
struct TweetsResponse<T> {
    tweets: Vec<T>,
    total: u64,
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    users: Vec<User>,
    total: u64,
}

/// `page` defaults to 1, `limit` to the configured page size; both must be
/// positive integers.
pub fn parse_pagination(
    page: Option<&str>,
    limit: Option<&str>,
    default_limit: u64,
) -> Result<Pagination, ApiError> {
    let page = match page.map(str::trim).filter(|p| !p.is_empty()) {
        None => 1,
        Some(raw) => raw.parse::<u64>().ok().filter(|p| *p > 0).ok_or_else(|| {
            ApiError::BadRequest("the page param must be a number greater than zero".into())
        })?,
    };
    let limit = match limit.map(str::trim).filter(|l| !l.is_empty()) {
        None => default_limit,
        Some(raw) => raw.parse::<u64>().ok().filter(|l| *l > 0).ok_or_else(|| {
            ApiError::BadRequest("the limit param must be a number greater than zero".into())
        })?,
    };
    Ok(Pagination::new(page, limit))
}

fn parse_kind(kind: Option<&str>) -> Result<UsersKind, ApiError> {
    match kind.map(str::trim) {
        Some("new") => Ok(UsersKind::New),
        Some("follow") => Ok(UsersKind::Follow),
        _ => Err(ApiError::BadRequest(
            "the type param must be new or follow".into(),
        )),
    }
}

fn parse_flag(raw: Option<&str>) -> Result<bool, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(false),
        Some(value) => value
            .parse::<bool>()
            .map_err(|_| ApiError::BadRequest("the onlytweets param must be true or false".into())),
    }
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if EMAIL.is_match(email) {
        Ok(())
    } else {
        Err(ApiError::BadRequest("the email is invalid".into()))
    }
}

/// Answers 503 on every route but `/health` while the store is unreachable.
pub async fn require_store(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    if req.path() != "/health" {
        let store = req.app_data::<web::Data<SharedStore>>().cloned();
        if let Some(store) = store {
            if !store.is_connected().await {
                warn!("rejecting {} {}: store unreachable", req.method(), req.path());
                return Err(ApiError::Unavailable.into());
            }
        }
    }
    next.call(req).await
}

#[get("/health")]
pub async fn health(store: web::Data<SharedStore>) -> HttpResponse {
    if store.is_connected().await {
        HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "backend": store.backend().as_str() }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "unavailable" }))
    }
}

#[post("/registry")]
pub async fn registry(
    store: web::Data<SharedStore>,
    user: web::Json<User>,
) -> Result<HttpResponse, ApiError> {
    let user = user.into_inner();
    validate_email(&user.email)?;
    if user.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "the password must have at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if store.is_user(&user.email).await?.is_some() {
        return Err(StoreError::DuplicateEmail(user.email).into());
    }

    let id = store.insert_user(user).await?;
    Ok(HttpResponse::Created().json(IdResponse { id }))
}

#[post("/login")]
pub async fn login(
    store: web::Data<SharedStore>,
    keys: web::Data<JwtKeys>,
    credentials: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_email(&credentials.email)?;
    let user = store
        .try_login(&credentials.email, &credentials.password)
        .await?
        .ok_or(ApiError::BadCredentials)?;
    let token = keys
        .issue(&user)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("user {} logged in", user.id);
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

#[get("/profile")]
pub async fn profile(
    store: web::Data<SharedStore>,
    _caller: Caller,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, ApiError> {
    let user = store
        .get_profile(query.id()?)
        .await?
        .ok_or(StoreError::not_found("user"))?;
    Ok(HttpResponse::Ok().json(user))
}

#[put("/registry")]
pub async fn modify_registry(
    store: web::Data<SharedStore>,
    caller: Caller,
    patch: web::Json<UserPatch>,
) -> Result<HttpResponse, ApiError> {
    store.modify_registry(&caller.id, &patch).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/tweet")]
pub async fn create_tweet(
    store: web::Data<SharedStore>,
    caller: Caller,
    body: web::Json<TweetRequest>,
) -> Result<HttpResponse, ApiError> {
    let tweet = NewTweet {
        user_id: caller.id,
        message: body.into_inner().message,
        date: Utc::now(),
    };
    let id = store.insert_tweet(tweet).await?;
    info!("tweet {id} created");
    Ok(HttpResponse::Created().json(IdResponse { id }))
}

#[get("/tweets")]
pub async fn get_tweets(
    store: web::Data<SharedStore>,
    config: web::Data<ApiConfig>,
    _caller: Caller,
    query: web::Query<TweetsQuery>,
) -> Result<HttpResponse, ApiError> {
    let pagination = parse_pagination(
        query.page.as_deref(),
        query.limit.as_deref(),
        config.records_limit,
    )?;
    let page = store
        .get_tweets(required_id(query.id.as_deref())?, pagination)
        .await?;
    Ok(HttpResponse::Ok().json(TweetsResponse {
        tweets: page.items,
        total: page.total,
    }))
}

#[delete("/tweet")]
pub async fn delete_tweet(
    store: web::Data<SharedStore>,
    caller: Caller,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, ApiError> {
    store.delete_tweet(query.id()?, &caller.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/relation")]
pub async fn insert_relation(
    store: web::Data<SharedStore>,
    caller: Caller,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, ApiError> {
    store.insert_relation(&caller.id, query.id()?).await?;
    Ok(HttpResponse::Created().finish())
}

#[delete("/relation")]
pub async fn delete_relation(
    store: web::Data<SharedStore>,
    caller: Caller,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, ApiError> {
    store.delete_relation(&caller.id, query.id()?).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/relation")]
pub async fn get_relation(
    store: web::Data<SharedStore>,
    caller: Caller,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, ApiError> {
    let status = store
        .is_relation(&caller.id, query.id()?)
        .await?
        .is_some_and(|relation| relation.active);
    Ok(HttpResponse::Ok().json(StatusResponse { status }))
}

#[get("/users")]
pub async fn get_users(
    store: web::Data<SharedStore>,
    config: web::Data<ApiConfig>,
    caller: Caller,
    query: web::Query<ListingQuery>,
) -> Result<HttpResponse, ApiError> {
    let kind = parse_kind(query.kind.as_deref())?;
    let pagination = parse_pagination(
        query.page.as_deref(),
        query.limit.as_deref(),
        config.records_limit,
    )?;
    let listing = UserQuery {
        pagination,
        search: query.search.clone(),
    };
    let page = store.get_users(&caller.id, &listing, kind).await?;
    Ok(HttpResponse::Ok().json(UsersResponse {
        users: page.items,
        total: page.total,
    }))
}

#[get("/followers")]
pub async fn get_followers(
    store: web::Data<SharedStore>,
    config: web::Data<ApiConfig>,
    caller: Caller,
    query: web::Query<ListingQuery>,
) -> Result<HttpResponse, ApiError> {
    let pagination = parse_pagination(
        query.page.as_deref(),
        query.limit.as_deref(),
        config.records_limit,
    )?;
    let listing = UserQuery {
        pagination,
        search: query.search.clone(),
    };
    let page = store.get_followers(&caller.id, &listing).await?;
    Ok(HttpResponse::Ok().json(UsersResponse {
        users: page.items,
        total: page.total,
    }))
}

#[get("/tweets/following")]
pub async fn get_following_tweets(
    store: web::Data<SharedStore>,
    config: web::Data<ApiConfig>,
    caller: Caller,
    query: web::Query<TimelineQuery>,
) -> Result<HttpResponse, ApiError> {
    let pagination = parse_pagination(
        query.page.as_deref(),
        query.limit.as_deref(),
        config.records_limit,
    )?;
    let only_tweets = parse_flag(query.onlytweets.as_deref())?;
    let timeline = store
        .get_following_tweets(&caller.id, pagination, only_tweets)
        .await?;
    debug!(
        "timeline for {}: {} of {} posts",
        caller.id,
        timeline.len(),
        timeline.total()
    );
    let response = match timeline {
        Timeline::Tweets(page) => HttpResponse::Ok().json(TweetsResponse::<Tweet> {
            tweets: page.items,
            total: page.total,
        }),
        Timeline::UserTweets(page) => HttpResponse::Ok().json(TweetsResponse::<UserTweet> {
            tweets: page.items,
            total: page.total,
        }),
    };
    Ok(response)
}

/// Registers every route and the JSON/query error mapping.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()),
    )
    .service(health)
    .service(registry)
    .service(login)
    .service(profile)
    .service(modify_registry)
    .service(create_tweet)
    .service(get_following_tweets)
    .service(get_tweets)
    .service(delete_tweet)
    .service(insert_relation)
    .service(delete_relation)
    .service(get_relation)
    .service(get_users)
    .service(get_followers);
}
