use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{Json, Router, debug_handler, extract::State, http::StatusCode, routing::{get, post}};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::appresult::{ApiError, AppResult};
use crate::auth::{AuthUser, TokenKeys};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/me", get(me))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Credentials {
    email: String,
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn signup(
    State(db_pool): State<SqlitePool>,
    State(keys): State<TokenKeys>,
    Json(Credentials { email, password }): Json<Credentials>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(ApiError::validation("A valid email is required."));
    }
    if password.len() < 8 {
        return Err(ApiError::validation("Password must be at least 8 characters."));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();

    let id = Uuid::now_v7().to_string();
    let display_name = generate_display_name();
    let created_at = OffsetDateTime::now_utc();

    let inserted = sqlx::query(
        "INSERT INTO users (id, email, password_hash, display_name, created_at) VALUES (?,?,?,?,?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(&password_hash)
    .bind(&display_name)
    .bind(created_at)
    .execute(&db_pool)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ApiError::conflict("Email already in use."));
        }
        Err(err) => return Err(err.into()),
    }

    tracing::info!(user = %id, "user created");

    let user = User { id: id.clone(), email, display_name, created_at };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user, "token": keys.mint(&id) })),
    ))
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(db_pool): State<SqlitePool>,
    State(keys): State<TokenKeys>,
    Json(Credentials { email, password }): Json<Credentials>,
) -> AppResult<Json<serde_json::Value>> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT id, password_hash FROM users WHERE email=?")
            .bind(&email)
            .fetch_optional(&db_pool)
            .await?;

    let Some((id, password_hash)) = row else {
        return Err(ApiError::unauthorized("Invalid credentials."));
    };

    let parsed = PasswordHash::new(&password_hash)
        .map_err(|e| anyhow::anyhow!("stored password hash is unreadable: {e}"))?;
    if Argon2::default().verify_password(password.as_bytes(), &parsed).is_err() {
        return Err(ApiError::unauthorized("Invalid credentials."));
    }

    let user = fetch_user(&db_pool, &id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials."))?;

    Ok(Json(json!({ "user": user, "token": keys.mint(&id) })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<User>> {
    let user = fetch_user(&db_pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    Ok(Json(user))
}

pub async fn fetch_user(db_pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT id, email, display_name, created_at FROM users WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

fn generate_display_name() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];

    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Phoenix", "Griffin",
        "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    format!(
        "{} {}",
        adjectives.choose(&mut rng).unwrap(),
        nouns.choose(&mut rng).unwrap()
    )
}
