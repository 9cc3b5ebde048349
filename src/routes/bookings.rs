//! Booking listings: OwnerRez short-term stays are read-only (synced by an
//! external importer); mid-term tenancies are entered and edited here.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, BookingPath,
    BookingsQuery, CreateMidTermBookingInput, UpdateMidTermBookingInput,
};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/ownerrez-bookings",
            axum::routing::get(list_ownerrez_bookings),
        )
        .route(
            "/mid-term-bookings",
            axum::routing::get(list_mid_term_bookings).post(create_mid_term_booking),
        )
        .route(
            "/mid-term-bookings/{booking_id}",
            axum::routing::patch(update_mid_term_booking),
        )
}

async fn list_ownerrez_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let mut filters = Map::new();
    if let Some(property_id) = non_empty(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(from_date) = non_empty(query.from_date.as_deref()) {
        filters.insert("check_out__gte".to_string(), Value::String(from_date));
    }
    if let Some(to_date) = non_empty(query.to_date.as_deref()) {
        filters.insert("check_in__lte".to_string(), Value::String(to_date));
    }

    let rows = list_rows(
        pool,
        "ownerrez_bookings",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        "check_in",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn list_mid_term_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let mut filters = Map::new();
    if let Some(property_id) = non_empty(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(status) = non_empty(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(from_date) = non_empty(query.from_date.as_deref()) {
        filters.insert("end_date__gte".to_string(), Value::String(from_date));
    }
    if let Some(to_date) = non_empty(query.to_date.as_deref()) {
        filters.insert("start_date__lte".to_string(), Value::String(to_date));
    }

    let rows = list_rows(
        pool,
        "mid_term_bookings",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        "start_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_mid_term_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMidTermBookingInput>,
) -> AppResult<impl IntoResponse> {
    require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = state.require_db()?;

    let start = parse_date(&payload.start_date)?;
    let end = parse_date(&payload.end_date)?;
    if end < start {
        return Err(AppError::BadRequest(
            "end_date must not precede start_date.".to_string(),
        ));
    }
    if payload.monthly_rent <= 0.0 {
        return Err(AppError::BadRequest(
            "monthly_rent must be positive.".to_string(),
        ));
    }

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "mid_term_bookings", &record).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_mid_term_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateMidTermBookingInput>,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    if let Some(rent) = payload.monthly_rent {
        if rent <= 0.0 {
            return Err(AppError::BadRequest(
                "monthly_rent must be positive.".to_string(),
            ));
        }
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "mid_term_bookings", &path.booking_id, &patch).await?;
    Ok(Json(updated))
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date.".to_string()))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
