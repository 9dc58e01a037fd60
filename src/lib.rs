pub mod appresult;
pub mod auth;
pub mod catalog;
pub mod db;
pub mod notify;
pub mod profanity;
pub mod rooms;
pub mod scheduler;
pub mod users;

use std::sync::Arc;

use axum::{Router, extract::FromRef};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

pub use appresult::{ApiError, AppResult};

use auth::TokenKeys;
use notify::{Notifier, Outbound};
use profanity::ProfanityFilter;
use scheduler::RoomScheduler;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub keys: TokenKeys,
    pub tx: broadcast::Sender<Outbound>,
    pub scheduler: Arc<RoomScheduler>,
    pub notifier: Arc<dyn Notifier>,
    pub profanity: Arc<ProfanityFilter>,
}

/// The full HTTP surface. Split out of `main` so integration tests can
/// drive the same router against an in-memory database.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(rooms::router())
        .merge(catalog::router())
        .nest("/user", users::router())
        .nest("/notifications", notify::router())
        .with_state(state)
}
