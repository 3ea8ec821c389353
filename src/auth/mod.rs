use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod gate;
pub mod handlers;
pub mod password;
pub mod ratelimit;
pub mod store;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
