//! The per-session receipt wizard: upload, rotate, crop, extract, wrangle.

pub mod dto;
pub mod handlers;
pub mod machine;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
