//! Collation of all persisted receipts and the export downloads.

pub mod dto;
pub mod handlers;
pub mod service;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
