use axum::{Json, Router, debug_handler, extract::{Path, State}, http::StatusCode, routing::{get, post}};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::appresult::{ApiError, AppResult};
use crate::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/categorie/createCategorie", post(create_category))
        .route("/categorie/getAllCategories", get(get_all_categories))
        .route("/categorie/getCategorieById/{id}", get(get_category_by_id))
        .route("/theme/createTheme", post(create_theme))
        .route("/theme/getAllThemes", get(get_all_themes))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Theme {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateCategoryBody {
    name: Option<String>,
    description: Option<String>,
    image: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_category(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
    Json(body): Json<CreateCategoryBody>,
) -> AppResult<(StatusCode, Json<Category>)> {
    let (Some(name), Some(description), Some(image)) = (body.name, body.description, body.image)
    else {
        return Err(ApiError::validation("Name, description and image are required."));
    };

    let category = Category {
        id: Uuid::now_v7().to_string(),
        name,
        description,
        image,
        created_at: OffsetDateTime::now_utc(),
    };

    let inserted = sqlx::query(
        "INSERT INTO categories (id, name, description, image, created_at) VALUES (?,?,?,?,?)",
    )
    .bind(&category.id)
    .bind(&category.name)
    .bind(&category.description)
    .bind(&category.image)
    .bind(category.created_at)
    .execute(&db_pool)
    .await;

    match inserted {
        Ok(_) => Ok((StatusCode::CREATED, Json(category))),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(ApiError::conflict("Category name already exists."))
        }
        Err(err) => Err(err.into()),
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn get_all_categories(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
) -> AppResult<Json<Vec<Category>>> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, name, description, image, created_at FROM categories ORDER BY name",
    )
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(categories))
}

#[debug_handler(state = AppState)]
pub(crate) async fn get_category_by_id(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let category = fetch_category(&db_pool, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found."))?;

    let rooms: Vec<String> =
        sqlx::query_scalar("SELECT room_id FROM category_rooms WHERE category_id=?")
            .bind(&id)
            .fetch_all(&db_pool)
            .await?;

    Ok(Json(json!({
        "id": category.id,
        "name": category.name,
        "description": category.description,
        "image": category.image,
        "created_at": category.created_at.format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| anyhow::anyhow!("timestamp formatting failed: {e}"))?,
        "rooms": rooms,
    })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateThemeBody {
    name: Option<String>,
    description: Option<String>,
    image: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_theme(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
    Json(body): Json<CreateThemeBody>,
) -> AppResult<(StatusCode, Json<Theme>)> {
    let (Some(name), Some(description)) = (body.name, body.description) else {
        return Err(ApiError::validation("Name and description are required."));
    };

    let theme = Theme {
        id: Uuid::now_v7().to_string(),
        name,
        description,
        image: body.image,
        created_at: OffsetDateTime::now_utc(),
    };

    let inserted = sqlx::query(
        "INSERT INTO themes (id, name, description, image, created_at) VALUES (?,?,?,?,?)",
    )
    .bind(&theme.id)
    .bind(&theme.name)
    .bind(&theme.description)
    .bind(&theme.image)
    .bind(theme.created_at)
    .execute(&db_pool)
    .await;

    match inserted {
        Ok(_) => Ok((StatusCode::CREATED, Json(theme))),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(ApiError::conflict("Theme name already exists."))
        }
        Err(err) => Err(err.into()),
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn get_all_themes(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
) -> AppResult<Json<Vec<Theme>>> {
    let themes = sqlx::query_as::<_, Theme>(
        "SELECT id, name, description, image, created_at FROM themes ORDER BY name",
    )
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(themes))
}

pub(crate) async fn fetch_category(
    db_pool: &SqlitePool,
    id: &str,
) -> Result<Option<Category>, sqlx::Error> {
    sqlx::query_as::<_, Category>(
        "SELECT id, name, description, image, created_at FROM categories WHERE id=?",
    )
    .bind(id)
    .fetch_optional(db_pool)
    .await
}

pub(crate) async fn fetch_theme(db_pool: &SqlitePool, id: &str) -> Result<Option<Theme>, sqlx::Error> {
    sqlx::query_as::<_, Theme>(
        "SELECT id, name, description, image, created_at FROM themes WHERE id=?",
    )
    .bind(id)
    .fetch_optional(db_pool)
    .await
}

/// Back-references a freshly created room from its category and theme.
/// Runs outside any transaction; the caller decides what a partial write
/// means (see createRoom).
pub(crate) async fn append_room_refs(
    db_pool: &SqlitePool,
    category_id: &str,
    theme_id: &str,
    room_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO category_rooms (category_id, room_id) VALUES (?,?)")
        .bind(category_id)
        .bind(room_id)
        .execute(db_pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO theme_rooms (theme_id, room_id) VALUES (?,?)")
        .bind(theme_id)
        .bind(room_id)
        .execute(db_pool)
        .await?;
    Ok(())
}
