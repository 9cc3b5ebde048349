//! Monthly reconciliation endpoints, including the finalize pipeline that
//! folds bookings, expenses, and visits into owner line items.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Datelike, NaiveDate};
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, CreateReconciliationInput,
    IncludeItemsInput, LineItemPath, ReconciliationPath, ReconciliationsQuery, UpdateLineItemInput,
};
use crate::services::audit::write_audit_log;
use crate::services::fees::FeeSchedule;
use crate::services::finalize::{finalize_reconciliation, include_selected_items};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/reconciliations",
            axum::routing::get(list_reconciliations).post(create_reconciliation),
        )
        .route(
            "/reconciliations/{reconciliation_id}",
            axum::routing::get(get_reconciliation),
        )
        .route(
            "/reconciliations/{reconciliation_id}/finalize",
            axum::routing::post(finalize),
        )
        .route(
            "/reconciliations/{reconciliation_id}/include-items",
            axum::routing::post(include_items),
        )
        .route(
            "/reconciliations/{reconciliation_id}/line-items/{item_id}",
            axum::routing::patch(update_line_item),
        )
}

async fn list_reconciliations(
    State(state): State<AppState>,
    Query(query): Query<ReconciliationsQuery>,
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
    if let Some(month) = non_empty(query.month.as_deref()) {
        filters.insert("month".to_string(), Value::String(month));
    }

    let rows = list_rows(
        pool,
        "monthly_reconciliations",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        "month",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_reconciliation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateReconciliationInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let month = NaiveDate::parse_from_str(payload.month.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("month must be an ISO date.".to_string()))?;
    let month = month.with_day(1).unwrap_or(month);

    // Property must exist before a period can be opened against it.
    get_row(pool, "properties", &payload.property_id).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("month".to_string(), Value::String(month.to_string()));
    record.insert("status".to_string(), Value::String("preview".to_string()));

    // The (property_id, month) unique constraint maps to 409 via the
    // repository's duplicate-key handling.
    let created = create_row(pool, "monthly_reconciliations", &record).await?;

    let reconciliation_id = created
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    write_audit_log(
        state.db_pool.as_ref(),
        &reconciliation_id,
        Some(&user_id),
        "create",
        &format!("Opened reconciliation for {month}"),
        None,
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_reconciliation(
    State(state): State<AppState>,
    Path(path): Path<ReconciliationPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let record = get_row(pool, "monthly_reconciliations", &path.reconciliation_id).await?;

    let mut filters = Map::new();
    filters.insert(
        "reconciliation_id".to_string(),
        Value::String(path.reconciliation_id.clone()),
    );
    let items = list_rows(
        pool,
        "reconciliation_line_items",
        Some(&filters),
        5000,
        "item_date",
        true,
    )
    .await?;

    Ok(Json(json!({ "reconciliation": record, "line_items": items })))
}

async fn finalize(
    State(state): State<AppState>,
    Path(path): Path<ReconciliationPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let schedule =
        FeeSchedule::with_default_percentage(state.config.default_management_fee_percentage);
    let outcome =
        finalize_reconciliation(pool, &schedule, &path.reconciliation_id, &user_id).await?;

    Ok(Json(json!({
        "success": true,
        "reconciliation_id": outcome.reconciliation_id,
        "total_revenue": outcome.total_revenue,
        "management_fee": outcome.management_fee,
        "new_items_added": outcome.new_items_added,
    })))
}

async fn include_items(
    State(state): State<AppState>,
    Path(path): Path<ReconciliationPath>,
    headers: HeaderMap,
    Json(payload): Json<IncludeItemsInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    if payload.expense_ids.is_empty() && payload.visit_ids.is_empty() {
        return Err(AppError::BadRequest(
            "Provide expense_ids or visit_ids to include.".to_string(),
        ));
    }

    let new_items_added = include_selected_items(
        pool,
        &path.reconciliation_id,
        &payload.expense_ids,
        &payload.visit_ids,
        &user_id,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "new_items_added": new_items_added,
    })))
}

async fn update_line_item(
    State(state): State<AppState>,
    Path(path): Path<LineItemPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLineItemInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let item = get_row(pool, "reconciliation_line_items", &path.item_id).await?;
    let parent = item
        .get("reconciliation_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if parent != path.reconciliation_id {
        return Err(AppError::NotFound(
            "Line item does not belong to this reconciliation.".to_string(),
        ));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest(
            "Provide verified or excluded to update.".to_string(),
        ));
    }
    let updated = update_row(pool, "reconciliation_line_items", &path.item_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        &path.reconciliation_id,
        Some(&user_id),
        "update_line_item",
        &format!("Updated line item {}", path.item_id),
        Some(Value::Object(patch)),
    )
    .await;

    Ok(Json(updated))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
