use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateVisitInput,
    UpdateVisitInput, VisitPath, VisitsQuery,
};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/visits", axum::routing::get(list_visits).post(create_visit))
        .route("/visits/{visit_id}", axum::routing::patch(update_visit))
}

async fn list_visits(
    State(state): State<AppState>,
    Query(query): Query<VisitsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let mut filters = Map::new();
    if let Some(property_id) = non_empty(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(billed) = query.billed {
        filters.insert("billed".to_string(), Value::Bool(billed));
    }
    if let Some(from_date) = non_empty(query.from_date.as_deref()) {
        filters.insert("visit_date__gte".to_string(), Value::String(from_date));
    }
    if let Some(to_date) = non_empty(query.to_date.as_deref()) {
        filters.insert("visit_date__lte".to_string(), Value::String(to_date));
    }

    let rows = list_rows(
        pool,
        "visits",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        "visit_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVisitInput>,
) -> AppResult<impl IntoResponse> {
    require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = state.require_db()?;

    if payload.price <= 0.0 {
        return Err(AppError::BadRequest("price must be positive.".to_string()));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("billed".to_string(), Value::Bool(false));
    let created = create_row(pool, "visits", &record).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_visit(
    State(state): State<AppState>,
    Path(path): Path<VisitPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateVisitInput>,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let record = get_row(pool, "visits", &path.visit_id).await?;
    if record
        .get("billed")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(AppError::Conflict(
            "Visit is already billed on a reconciliation and cannot be edited.".to_string(),
        ));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "visits", &path.visit_id, &patch).await?;
    Ok(Json(updated))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
