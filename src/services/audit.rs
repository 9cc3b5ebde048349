//! Append-only audit trail for reconciliation activity. Writes are
//! best-effort: a failed insert is logged and never fails the request that
//! produced it.

use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

pub async fn write_audit_log(
    pool: Option<&PgPool>,
    reconciliation_id: &str,
    actor_id: Option<&str>,
    action: &str,
    summary: &str,
    details: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut entry = Map::new();
    entry.insert(
        "reconciliation_id".to_string(),
        Value::String(reconciliation_id.to_string()),
    );
    if let Some(actor) = actor_id.filter(|value| !value.trim().is_empty()) {
        entry.insert("actor_id".to_string(), Value::String(actor.to_string()));
    }
    entry.insert("action".to_string(), Value::String(action.to_string()));
    entry.insert("summary".to_string(), Value::String(summary.to_string()));
    if let Some(details) = details {
        entry.insert("details".to_string(), details);
    }

    if let Err(error) = create_row(pool, "reconciliation_audit_log", &entry).await {
        tracing::warn!(
            reconciliation_id,
            action,
            error = %error,
            "Audit log write failed (non-fatal)"
        );
    }
}
