use axum::{Json, debug_handler, extract::{Path, Query, State}};
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::appresult::{ApiError, AppResult};
use crate::auth::AuthUser;
use crate::rooms::{Room, RoomKind, RoomRow, ROOM_COLUMNS, fetch_room, participant_ids};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_room_by_id(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Room>> {
    let room = fetch_room(&db_pool, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Room not found."))?;
    Ok(Json(room))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    categorie: Option<String>,
    thematic: Option<String>,
    sponsored: Option<String>,
    #[serde(rename = "startAfter")]
    start_after: Option<String>,
    available: Option<String>,
}

struct Filters {
    kind: Option<RoomKind>,
    category: Option<String>,
    theme: Option<String>,
    sponsored: Option<bool>,
    start_after: Option<OffsetDateTime>,
    available: bool,
}

impl Filters {
    fn from_query(query: ListQuery) -> AppResult<Self> {
        // Unknown `type`/`sponsored` values fall through unfiltered, like
        // the non-matching branches of the original query parser.
        let start_after = query
            .start_after
            .map(|raw| {
                OffsetDateTime::parse(&raw, &Rfc3339)
                    .map_err(|_| ApiError::validation("Invalid startAfter date."))
            })
            .transpose()?;

        Ok(Self {
            kind: query.kind.as_deref().and_then(RoomKind::parse),
            category: query.categorie,
            theme: query.thematic,
            sponsored: match query.sponsored.as_deref() {
                Some("true") => Some(true),
                Some("false") => Some(false),
                _ => None,
            },
            start_after,
            available: query.available.as_deref() == Some("true"),
        })
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(kind) = self.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(category) = &self.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(theme) = &self.theme {
            qb.push(" AND theme = ").push_bind(theme.clone());
        }
        if let Some(sponsored) = self.sponsored {
            qb.push(" AND is_sponsored = ").push_bind(sponsored);
        }
        if let Some(start_after) = self.start_after {
            qb.push(" AND start_time IS NOT NULL AND start_time >= ")
                .push_bind(start_after);
        }
        if self.available {
            qb.push(
                " AND (SELECT COUNT(*) FROM room_participants rp WHERE rp.room_id = rooms.id) \
                 < max_participants",
            );
        }
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_all_rooms(
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);
    let filters = Filters::from_query(query)?;

    let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM rooms WHERE 1=1");
    filters.push_where(&mut count_query);
    let total: i64 = count_query.build_query_scalar().fetch_one(&db_pool).await?;

    let mut list_query =
        QueryBuilder::new(format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE 1=1"));
    filters.push_where(&mut list_query);
    list_query
        .push(" ORDER BY start_time ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);

    let rows: Vec<RoomRow> = list_query.build_query_as().fetch_all(&db_pool).await?;

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        let participants = participant_ids(&db_pool, &row.id).await?;
        rooms.push(row.into_room(participants)?);
    }

    let total_pages = (total as u64).div_ceil(limit as u64) as i64;
    Ok(Json(json!({
        "rooms": rooms,
        "pagination": {
            "total": total,
            "page": page,
            "limit": limit,
            "total_pages": total_pages,
            "has_next": page < total_pages,
            "has_prev": page > 1,
        },
    })))
}
