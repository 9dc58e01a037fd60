use std::sync::Arc;

use anyhow::Context as _;
use causerie::auth::TokenKeys;
use causerie::notify::{ChannelNotifier, Notifier};
use causerie::profanity::ProfanityFilter;
use causerie::scheduler::RoomScheduler;
use causerie::{AppState, db};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "causerie=info".into()),
        )
        .init();

    let db_url = dotenv::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://causerie.db?mode=rwc".to_owned());
    let db_pool = db::connect(&db_url).await.context("database setup failed")?;

    let auth_key = dotenv::var("AUTH_KEY").context("AUTH_KEY must be set")?;

    let (tx, _) = broadcast::channel(256);
    let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::new(db_pool.clone(), tx.clone()));
    let scheduler = RoomScheduler::new(db_pool.clone(), Arc::clone(&notifier));

    // Jobs are in-memory only; rebuild them for every room that is still
    // ahead of us.
    scheduler.schedule_all_future_rooms().await;

    let state = AppState {
        db_pool,
        keys: TokenKeys::new(&auth_key),
        tx,
        scheduler,
        notifier,
        profanity: Arc::new(ProfanityFilter::new()),
    };

    let app = causerie::router(state).layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
