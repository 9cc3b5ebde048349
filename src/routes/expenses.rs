use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, delete_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateExpenseInput,
    ExpensePath, ExpensesQuery, UpdateExpenseInput,
};
use crate::services::line_items::is_visit_purpose;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/expenses",
            axum::routing::get(list_expenses).post(create_expense),
        )
        .route(
            "/expenses/{expense_id}",
            axum::routing::get(get_expense)
                .patch(update_expense)
                .delete(delete_expense),
        )
}

async fn list_expenses(
    State(state): State<AppState>,
    Query(query): Query<ExpensesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let mut filters = Map::new();
    if let Some(property_id) = non_empty(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(category) = non_empty(query.category.as_deref()) {
        filters.insert("category".to_string(), Value::String(category));
    }
    if let Some(exported) = query.exported {
        filters.insert("exported".to_string(), Value::Bool(exported));
    }
    if let Some(from_date) = non_empty(query.from_date.as_deref()) {
        filters.insert("expense_date__gte".to_string(), Value::String(from_date));
    }
    if let Some(to_date) = non_empty(query.to_date.as_deref()) {
        filters.insert("expense_date__lte".to_string(), Value::String(to_date));
    }

    let rows = list_rows(
        pool,
        "expenses",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        "expense_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateExpenseInput>,
) -> AppResult<impl IntoResponse> {
    require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = state.require_db()?;

    if payload.amount <= 0.0 {
        return Err(AppError::BadRequest("amount must be positive.".to_string()));
    }
    // Visit charges belong in the Visit flow; storing them as expenses would
    // leave them invisible to billing.
    if is_visit_purpose(&payload.purpose) {
        return Err(AppError::BadRequest(
            "This looks like a visit charge. Record it as a visit, not an expense.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("exported".to_string(), Value::Bool(false));
    let created = create_row(pool, "expenses", &record).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_expense(
    State(state): State<AppState>,
    Path(path): Path<ExpensePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;
    let record = get_row(pool, "expenses", &path.expense_id).await?;
    Ok(Json(record))
}

async fn update_expense(
    State(state): State<AppState>,
    Path(path): Path<ExpensePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateExpenseInput>,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let record = get_row(pool, "expenses", &path.expense_id).await?;
    if record
        .get("exported")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(AppError::Conflict(
            "Expense is already billed on a reconciliation and cannot be edited.".to_string(),
        ));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "expenses", &path.expense_id, &patch).await?;
    Ok(Json(updated))
}

async fn delete_expense(
    State(state): State<AppState>,
    Path(path): Path<ExpensePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = state.require_db()?;

    let record = get_row(pool, "expenses", &path.expense_id).await?;
    if record
        .get("exported")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(AppError::Conflict(
            "Expense is already billed on a reconciliation and cannot be deleted.".to_string(),
        ));
    }

    let deleted = delete_row(pool, "expenses", &path.expense_id).await?;
    Ok(Json(deleted))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
