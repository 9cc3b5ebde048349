//! Finalize pipeline for a monthly reconciliation: deduplicate bookings,
//! aggregate revenue, sync the line-item delta, compute fees, and persist the
//! result in one transaction. The audit entry is written afterwards,
//! best-effort.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{get_row, list_rows, update_row_tx};
use crate::services::audit::write_audit_log;
use crate::services::booking_dedup::{filter_duplicates, MidTermBooking, StayBooking};
use crate::services::fees::{calculate as calculate_fee, FeeInputs, FeeSchedule};
use crate::services::line_items::{
    compute_delta, item_key, ExpenseRecord, LineItemDelta, VisitRecord, ITEM_TYPE_EXPENSE,
    ITEM_TYPE_VISIT,
};
use crate::services::revenue::{aggregate, round2, MonthWindow};

#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub reconciliation_id: String,
    pub total_revenue: f64,
    pub management_fee: f64,
    pub new_items_added: i64,
}

pub async fn finalize_reconciliation(
    pool: &PgPool,
    schedule: &FeeSchedule,
    reconciliation_id: &str,
    actor_id: &str,
) -> AppResult<FinalizeOutcome> {
    let reconciliation = get_row(pool, "monthly_reconciliations", reconciliation_id).await?;
    let property_id = value_str(&reconciliation, "property_id");
    if property_id.is_empty() {
        return Err(AppError::Internal(
            "Reconciliation is missing its property reference.".to_string(),
        ));
    }

    let month = date_from_value(reconciliation.get("month")).ok_or_else(|| {
        AppError::Internal("Reconciliation has an invalid month.".to_string())
    })?;
    // Gate first: nothing below this line runs, and nothing is written, for
    // a month still in progress.
    let window = month_window_if_ended(month, Utc::now().date_naive())?;

    // Property and owner are required collaborators; fail closed rather than
    // compute with defaults.
    let property = get_row(pool, "properties", &property_id).await?;
    let owner_id = value_str(&property, "owner_id");
    if owner_id.is_empty() {
        return Err(AppError::NotFound(
            "Property has no owner on record.".to_string(),
        ));
    }
    let owner = get_row(pool, "property_owners", &owner_id).await?;

    let sources = load_month_sources(pool, &property_id, reconciliation_id, &window).await?;

    let stays = filter_duplicates(sources.stays, &sources.mid_term);
    let has_mid_term_occupancy = !sources.mid_term.is_empty();
    let breakdown = aggregate(&stays, &sources.mid_term, &window);

    let delta = compute_delta(
        &sources.existing_keys,
        &stays,
        &sources.expenses,
        &sources.visits,
        &window,
    );

    let fee = calculate_fee(
        schedule,
        &FeeInputs {
            accommodation_revenue_total: breakdown.accommodation_revenue_total,
            mid_term_revenue: breakdown.mid_term_revenue,
            total_nights: breakdown.total_nights,
            management_fee_percentage: number_opt(property.get("management_fee_percentage")),
            has_mid_term_occupancy,
            is_property_live: !value_str(&property, "went_live_at").is_empty(),
        },
    );

    let (visit_fees, total_expenses) = cost_totals(&sources.existing_items, &delta);

    let mut totals = Map::new();
    totals.insert("status".to_string(), Value::String("draft".to_string()));
    totals.insert(
        "short_term_revenue".to_string(),
        json!(breakdown.short_term_revenue),
    );
    totals.insert(
        "mid_term_revenue".to_string(),
        json!(breakdown.mid_term_revenue),
    );
    totals.insert("total_revenue".to_string(), json!(breakdown.total_revenue));
    totals.insert("total_nights".to_string(), json!(breakdown.total_nights));
    totals.insert("management_fee".to_string(), json!(fee.management_fee));
    totals.insert(
        "order_minimum_fee".to_string(),
        json!(fee.order_minimum_fee),
    );
    totals.insert("visit_fees".to_string(), json!(visit_fees));
    totals.insert("total_expenses".to_string(), json!(total_expenses));
    totals.insert(
        "finalized_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    totals.insert(
        "finalized_by".to_string(),
        Value::String(actor_id.to_string()),
    );

    let new_items_added = apply_delta(pool, reconciliation_id, &delta, &totals).await?;

    let summary = format!(
        "Finalized with {} bookings, {} new expenses, {} new visits. Revenue: ${:.2}",
        delta.booking_count, delta.expense_count, delta.visit_count, breakdown.total_revenue
    );
    write_audit_log(
        Some(pool),
        reconciliation_id,
        Some(actor_id),
        "finalize",
        &summary,
        Some(json!({
            "owner_name": value_str(&owner, "name"),
            "total_revenue": breakdown.total_revenue,
            "management_fee": fee.management_fee,
            "order_minimum_fee": fee.order_minimum_fee,
            "new_items_added": new_items_added,
        })),
    )
    .await;

    tracing::info!(
        reconciliation_id,
        property_id,
        new_items_added,
        total_revenue = breakdown.total_revenue,
        management_fee = fee.management_fee,
        "Reconciliation finalized"
    );

    Ok(FinalizeOutcome {
        reconciliation_id: reconciliation_id.to_string(),
        total_revenue: breakdown.total_revenue,
        management_fee: fee.management_fee,
        new_items_added,
    })
}

/// Manual variant of the synchronizer: fold only the named unbilled expenses
/// and visits into the reconciliation, through the same transactional path.
pub async fn include_selected_items(
    pool: &PgPool,
    reconciliation_id: &str,
    expense_ids: &[String],
    visit_ids: &[String],
    actor_id: &str,
) -> AppResult<i64> {
    let reconciliation = get_row(pool, "monthly_reconciliations", reconciliation_id).await?;
    let property_id = value_str(&reconciliation, "property_id");
    let month = date_from_value(reconciliation.get("month")).ok_or_else(|| {
        AppError::Internal("Reconciliation has an invalid month.".to_string())
    })?;
    let window = MonthWindow::containing(month);

    let mut expenses = Vec::new();
    if !expense_ids.is_empty() {
        let mut filters = Map::new();
        filters.insert(
            "property_id".to_string(),
            Value::String(property_id.clone()),
        );
        filters.insert(
            "id".to_string(),
            Value::Array(expense_ids.iter().cloned().map(Value::String).collect()),
        );
        filters.insert("exported".to_string(), Value::Bool(false));
        let rows = list_rows(pool, "expenses", Some(&filters), 1000, "expense_date", true).await?;
        expenses = rows.iter().filter_map(expense_from_row).collect();
    }

    let mut visits = Vec::new();
    if !visit_ids.is_empty() {
        let mut filters = Map::new();
        filters.insert(
            "property_id".to_string(),
            Value::String(property_id.clone()),
        );
        filters.insert(
            "id".to_string(),
            Value::Array(visit_ids.iter().cloned().map(Value::String).collect()),
        );
        filters.insert("billed".to_string(), Value::Bool(false));
        let rows = list_rows(pool, "visits", Some(&filters), 1000, "visit_date", true).await?;
        visits = rows.iter().filter_map(visit_from_row).collect();
    }

    let existing_items = load_existing_items(pool, reconciliation_id).await?;
    let existing_keys = existing_item_keys(&existing_items);
    let delta = compute_delta(&existing_keys, &[], &expenses, &visits, &window);

    let (visit_fees, total_expenses) = cost_totals(&existing_items, &delta);
    let mut totals = Map::new();
    totals.insert("visit_fees".to_string(), json!(visit_fees));
    totals.insert("total_expenses".to_string(), json!(total_expenses));

    let new_items_added = apply_delta(pool, reconciliation_id, &delta, &totals).await?;

    write_audit_log(
        Some(pool),
        reconciliation_id,
        Some(actor_id),
        "include_items",
        &format!(
            "Included {} expenses and {} visits manually",
            delta.expense_count, delta.visit_count
        ),
        None,
    )
    .await;

    Ok(new_items_added)
}

/// Window for `month`, or a 400 when that month has not fully elapsed.
fn month_window_if_ended(month: NaiveDate, today: NaiveDate) -> AppResult<MonthWindow> {
    let window = MonthWindow::containing(month);
    if !window.has_ended(today) {
        return Err(AppError::BadRequest(
            "Reconciliation month has not ended yet.".to_string(),
        ));
    }
    Ok(window)
}

struct MonthSources {
    stays: Vec<StayBooking>,
    mid_term: Vec<MidTermBooking>,
    expenses: Vec<ExpenseRecord>,
    visits: Vec<VisitRecord>,
    existing_items: Vec<Value>,
    existing_keys: HashSet<String>,
}

async fn load_month_sources(
    pool: &PgPool,
    property_id: &str,
    reconciliation_id: &str,
    window: &MonthWindow,
) -> AppResult<MonthSources> {
    let start_iso = window.start.to_string();
    let end_iso = window.end.to_string();

    let mut stay_filters = Map::new();
    stay_filters.insert(
        "property_id".to_string(),
        Value::String(property_id.to_string()),
    );
    stay_filters.insert("check_in__lte".to_string(), Value::String(end_iso.clone()));
    stay_filters.insert(
        "check_out__gte".to_string(),
        Value::String(start_iso.clone()),
    );

    let mut mid_term_filters = Map::new();
    mid_term_filters.insert(
        "property_id".to_string(),
        Value::String(property_id.to_string()),
    );
    mid_term_filters.insert("status".to_string(), Value::String("active".to_string()));
    mid_term_filters.insert(
        "start_date__lte".to_string(),
        Value::String(end_iso.clone()),
    );
    mid_term_filters.insert(
        "end_date__gte".to_string(),
        Value::String(start_iso.clone()),
    );

    let mut expense_filters = Map::new();
    expense_filters.insert(
        "property_id".to_string(),
        Value::String(property_id.to_string()),
    );
    expense_filters.insert("exported".to_string(), Value::Bool(false));
    expense_filters.insert(
        "expense_date__gte".to_string(),
        Value::String(start_iso.clone()),
    );
    expense_filters.insert(
        "expense_date__lte".to_string(),
        Value::String(end_iso.clone()),
    );

    let mut visit_filters = Map::new();
    visit_filters.insert(
        "property_id".to_string(),
        Value::String(property_id.to_string()),
    );
    visit_filters.insert("billed".to_string(), Value::Bool(false));
    visit_filters.insert("visit_date__gte".to_string(), Value::String(start_iso));
    visit_filters.insert("visit_date__lte".to_string(), Value::String(end_iso));

    let (stay_rows, mid_term_rows, expense_rows, visit_rows) = tokio::try_join!(
        list_rows(
            pool,
            "ownerrez_bookings",
            Some(&stay_filters),
            5000,
            "check_in",
            true,
        ),
        list_rows(
            pool,
            "mid_term_bookings",
            Some(&mid_term_filters),
            1000,
            "start_date",
            true,
        ),
        list_rows(
            pool,
            "expenses",
            Some(&expense_filters),
            5000,
            "expense_date",
            true,
        ),
        list_rows(pool, "visits", Some(&visit_filters), 1000, "visit_date", true),
    )?;

    let existing_items = load_existing_items(pool, reconciliation_id).await?;
    let existing_keys = existing_item_keys(&existing_items);

    Ok(MonthSources {
        stays: stay_rows.iter().filter_map(stay_from_row).collect(),
        mid_term: mid_term_rows.iter().filter_map(tenancy_from_row).collect(),
        expenses: expense_rows.iter().filter_map(expense_from_row).collect(),
        visits: visit_rows.iter().filter_map(visit_from_row).collect(),
        existing_items,
        existing_keys,
    })
}

async fn load_existing_items(pool: &PgPool, reconciliation_id: &str) -> AppResult<Vec<Value>> {
    let mut filters = Map::new();
    filters.insert(
        "reconciliation_id".to_string(),
        Value::String(reconciliation_id.to_string()),
    );
    list_rows(
        pool,
        "reconciliation_line_items",
        Some(&filters),
        5000,
        "item_date",
        true,
    )
    .await
}

/// Rebuilds the uniqueness key set from the stored line items. Rebuilt on
/// every invocation; nothing is cached between calls.
pub fn existing_item_keys(items: &[Value]) -> HashSet<String> {
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let item_type = item.get("item_type").and_then(Value::as_str)?;
            let item_id = item.get("item_id").and_then(Value::as_str)?;
            Some(item_key(item_type, item_id))
        })
        .collect()
}

/// Inserts the delta, flips source flags, and writes the totals patch in one
/// transaction. The unique constraint on (reconciliation_id, item_type,
/// item_id) turns a concurrent duplicate into a skipped row, not a failure.
async fn apply_delta(
    pool: &PgPool,
    reconciliation_id: &str,
    delta: &LineItemDelta,
    totals: &Map<String, Value>,
) -> AppResult<i64> {
    let reconciliation_uuid = uuid::Uuid::parse_str(reconciliation_id.trim())
        .map_err(|_| AppError::BadRequest("Invalid reconciliation id.".to_string()))?;

    let mut tx = pool.begin().await.map_err(tx_error)?;

    let mut new_items_added: i64 = 0;
    for item in &delta.items {
        let result = sqlx::query(
            "INSERT INTO reconciliation_line_items
                 (reconciliation_id, item_type, item_id, amount, item_date,
                  category, fee_type, description, verified, excluded)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, false)
             ON CONFLICT (reconciliation_id, item_type, item_id) DO NOTHING",
        )
        .bind(reconciliation_uuid)
        .bind(item.item_type)
        .bind(&item.item_id)
        .bind(item.amount)
        .bind(item.item_date)
        .bind(&item.category)
        .bind(item.fee_type.as_deref())
        .bind(&item.description)
        .execute(&mut *tx)
        .await
        .map_err(tx_error)?;
        new_items_added += result.rows_affected() as i64;
    }

    if !delta.folded_expense_ids.is_empty() {
        let ids = parse_uuid_list(&delta.folded_expense_ids)?;
        sqlx::query("UPDATE expenses SET exported = true WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(tx_error)?;
    }
    if !delta.folded_visit_ids.is_empty() {
        let ids = parse_uuid_list(&delta.folded_visit_ids)?;
        sqlx::query("UPDATE visits SET billed = true WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(tx_error)?;
    }

    if !totals.is_empty() {
        update_row_tx(&mut *tx, "monthly_reconciliations", reconciliation_id, totals).await?;
    }

    tx.commit().await.map_err(tx_error)?;
    Ok(new_items_added)
}

/// Cumulative visit and expense cost totals across stored items plus the
/// delta about to be inserted.
fn cost_totals(existing_items: &[Value], delta: &LineItemDelta) -> (f64, f64) {
    let mut visit_fees = 0.0;
    let mut total_expenses = 0.0;

    for item in existing_items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let amount = number_from_value(obj.get("amount")).abs();
        match obj.get("item_type").and_then(Value::as_str) {
            Some(ITEM_TYPE_VISIT) => visit_fees += amount,
            Some(ITEM_TYPE_EXPENSE) => total_expenses += amount,
            _ => {}
        }
    }
    for item in &delta.items {
        match item.item_type {
            ITEM_TYPE_VISIT => visit_fees += item.amount.abs(),
            ITEM_TYPE_EXPENSE => total_expenses += item.amount.abs(),
            _ => {}
        }
    }

    (round2(visit_fees), round2(total_expenses))
}

fn parse_uuid_list(ids: &[String]) -> AppResult<Vec<uuid::Uuid>> {
    ids.iter()
        .map(|id| {
            uuid::Uuid::parse_str(id.trim())
                .map_err(|_| AppError::Internal(format!("Invalid source id '{id}'.")))
        })
        .collect()
}

fn tx_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "Reconciliation transaction failed");
    AppError::Dependency("Database operation failed.".to_string())
}

fn stay_from_row(row: &Value) -> Option<StayBooking> {
    let obj = row.as_object()?;
    Some(StayBooking {
        id: value_str(row, "id"),
        guest_name: value_str(row, "guest_name"),
        check_in: date_from_value(obj.get("check_in"))?,
        check_out: date_from_value(obj.get("check_out"))?,
        accommodation_revenue: number_from_value(obj.get("accommodation_revenue")),
        total_amount: number_from_value(obj.get("total_amount")),
        cleaning_fee: number_from_value(obj.get("cleaning_fee")),
        pet_fee: number_from_value(obj.get("pet_fee")),
        listing_name: value_str(row, "listing_name"),
    })
}

fn tenancy_from_row(row: &Value) -> Option<MidTermBooking> {
    let obj = row.as_object()?;
    Some(MidTermBooking {
        id: value_str(row, "id"),
        tenant_name: value_str(row, "tenant_name"),
        start_date: date_from_value(obj.get("start_date"))?,
        end_date: date_from_value(obj.get("end_date"))?,
        monthly_rent: number_from_value(obj.get("monthly_rent")),
        status: value_str(row, "status"),
    })
}

fn expense_from_row(row: &Value) -> Option<ExpenseRecord> {
    let obj = row.as_object()?;
    Some(ExpenseRecord {
        id: value_str(row, "id"),
        amount: number_from_value(obj.get("amount")),
        purpose: value_str(row, "purpose"),
        expense_date: date_from_value(obj.get("expense_date"))?,
        category: value_str(row, "category"),
        exported: obj.get("exported").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn visit_from_row(row: &Value) -> Option<VisitRecord> {
    let obj = row.as_object()?;
    Some(VisitRecord {
        id: value_str(row, "id"),
        price: number_from_value(obj.get("price")),
        purpose: value_str(row, "purpose"),
        visit_date: date_from_value(obj.get("visit_date"))?,
        billed: obj.get("billed").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn number_from_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn number_opt(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn date_from_value(value: Option<&Value>) -> Option<NaiveDate> {
    let text = value.and_then(Value::as_str)?.trim();
    let date_part = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use chrono::NaiveDate;

    use super::{
        date_from_value, existing_item_keys, expense_from_row, month_window_if_ended, number_opt,
        stay_from_row,
    };
    use crate::error::AppError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_stay_rows_including_string_numerics() {
        let row = json!({
            "id": "b1",
            "guest_name": "John Smith",
            "check_in": "2026-01-05",
            "check_out": "2026-01-12",
            "accommodation_revenue": "1400.50",
            "total_amount": 1625,
            "cleaning_fee": 150.0,
            "pet_fee": null,
            "listing_name": "Peachtree Loft"
        });
        let stay = stay_from_row(&row).unwrap();
        assert_eq!(stay.accommodation_revenue, 1400.50);
        assert_eq!(stay.total_amount, 1625.0);
        assert_eq!(stay.pet_fee, 0.0);
    }

    #[test]
    fn rejects_rows_without_dates() {
        let row = json!({ "id": "e1", "amount": 80.0, "purpose": "Bulbs" });
        assert!(expense_from_row(&row).is_none());
    }

    #[test]
    fn builds_key_set_from_stored_items() {
        let items = vec![
            json!({ "item_type": "booking", "item_id": "b1" }),
            json!({ "item_type": "pass_through_fee", "item_id": "b1_cleaning" }),
            json!({ "item_id": "orphan" }),
        ];
        let keys = existing_item_keys(&items);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("booking:b1"));
        assert!(keys.contains("pass_through_fee:b1_cleaning"));
    }

    #[test]
    fn truncates_timestamps_to_dates() {
        let value = json!("2026-01-15T08:30:00+00:00");
        let date = date_from_value(Some(&value)).unwrap();
        assert_eq!(date.to_string(), "2026-01-15");
        assert!(date_from_value(Some(&json!("not-a-date"))).is_none());
    }

    #[test]
    fn open_month_is_rejected_before_any_work() {
        // Last day of the month is still "in progress"; the pipeline bails
        // here, before any source load or write.
        let error = month_window_if_ended(date(2026, 1, 1), date(2026, 1, 31)).unwrap_err();
        assert!(matches!(error, AppError::BadRequest(_)));
        assert_eq!(
            error.to_string(),
            "Reconciliation month has not ended yet."
        );

        let window = month_window_if_ended(date(2026, 1, 1), date(2026, 2, 1)).unwrap();
        assert_eq!(window.start, date(2026, 1, 1));
        assert_eq!(window.end, date(2026, 1, 31));
    }

    #[test]
    fn optional_numbers_stay_optional() {
        assert_eq!(number_opt(Some(&json!(12.5))), Some(12.5));
        assert_eq!(number_opt(Some(&json!("20"))), Some(20.0));
        assert_eq!(number_opt(Some(&json!(null))), None);
        assert_eq!(number_opt(None), None);
    }
}
