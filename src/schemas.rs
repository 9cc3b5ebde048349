use serde::Deserialize;
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max).clamp(min, max)
}

pub fn serialize_to_map<T: serde::Serialize>(input: &T) -> Map<String, Value> {
    serde_json::to_value(input)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default()
}

pub fn remove_nulls(mut map: Map<String, Value>) -> Map<String, Value> {
    map.retain(|_, value| !value.is_null());
    map
}

fn default_active() -> String {
    "active".to_string()
}

// --- paths ---

#[derive(Debug, Deserialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingPath {
    pub booking_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpensePath {
    pub expense_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VisitPath {
    pub visit_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReconciliationPath {
    pub reconciliation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LineItemPath {
    pub reconciliation_id: String,
    pub item_id: String,
}

// --- queries ---

#[derive(Debug, Deserialize)]
pub struct PropertiesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub property_id: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExpensesQuery {
    pub property_id: Option<String>,
    pub category: Option<String>,
    pub exported: Option<bool>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct VisitsQuery {
    pub property_id: Option<String>,
    pub billed: Option<bool>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReconciliationsQuery {
    pub property_id: Option<String>,
    pub status: Option<String>,
    pub month: Option<String>,
    pub limit: Option<i64>,
}

// --- inputs ---

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub owner_id: String,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub management_fee_percentage: Option<f64>,
    pub went_live_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePropertyInput {
    pub name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub management_fee_percentage: Option<f64>,
    pub went_live_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateMidTermBookingInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 255))]
    pub tenant_name: String,
    pub start_date: String,
    pub end_date: String,
    pub monthly_rent: f64,
    #[serde(default = "default_active")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateMidTermBookingInput {
    pub tenant_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub monthly_rent: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateExpenseInput {
    pub property_id: String,
    pub amount: f64,
    #[validate(length(min = 1, max = 1000))]
    pub purpose: String,
    pub expense_date: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateExpenseInput {
    pub amount: Option<f64>,
    pub purpose: Option<String>,
    pub expense_date: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateVisitInput {
    pub property_id: String,
    pub price: f64,
    #[validate(length(min = 1, max = 1000))]
    pub purpose: String,
    pub visit_date: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateVisitInput {
    pub price: Option<f64>,
    pub purpose: Option<String>,
    pub visit_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateReconciliationInput {
    pub property_id: String,
    /// First-of-month ISO date, e.g. "2026-01-01".
    pub month: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncludeItemsInput {
    #[serde(default)]
    pub expense_ids: Vec<String>,
    #[serde(default)]
    pub visit_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateLineItemInput {
    pub verified: Option<bool>,
    pub excluded: Option<bool>,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{clamp_limit_in_range, remove_nulls};

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(None, 1, 1000), 1000);
        assert_eq!(clamp_limit_in_range(Some(0), 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(Some(50), 1, 1000), 50);
        assert_eq!(clamp_limit_in_range(Some(9999), 1, 1000), 1000);
    }

    #[test]
    fn strips_null_fields() {
        let mut map = Map::new();
        map.insert("keep".to_string(), json!("x"));
        map.insert("drop".to_string(), Value::Null);
        let cleaned = remove_nulls(map);
        assert!(cleaned.contains_key("keep"));
        assert!(!cleaned.contains_key("drop"));
    }
}
