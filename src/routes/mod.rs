use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod bookings;
pub mod expenses;
pub mod health;
pub mod properties;
pub mod reconciliations;
pub mod visits;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(properties::router())
        .merge(bookings::router())
        .merge(expenses::router())
        .merge(visits::router())
        .merge(reconciliations::router())
}
