use std::path::PathBuf;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::artifacts::ArtifactKind;
use crate::auth::handlers::SessionAuth;
use crate::collate::dto::CollateStatus;
use crate::collate::service::{self, CollationSummary};
use crate::error::{internal, WizardError};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/collate/run", post(run))
        .route("/collate/status", get(status))
        .route("/collate/shops.csv", get(shops_csv))
        .route("/collate/items.csv", get(items_csv))
        .route("/collate/archive.zip", get(archive))
        .route("/collate/workbook.xlsx", get(workbook))
        .route("/collate/cleanup", post(cleanup))
}

/// The extraction and collation dirs of the session's user.
fn data_dirs(state: &AppState, token: &Uuid) -> Result<(PathBuf, PathBuf), (StatusCode, String)> {
    let session = state
        .sessions
        .get(token)
        .ok_or((StatusCode::UNAUTHORIZED, "Not logged in".to_string()))?;
    let username = session.username.as_deref();
    Ok((
        state.config.data.extraction_dir(username),
        state.config.data.collation_dir(username),
    ))
}

fn from_anyhow(err: anyhow::Error) -> (StatusCode, String) {
    match err.downcast::<WizardError>() {
        Ok(domain) => domain.into(),
        Err(other) => internal(other),
    }
}

#[instrument(skip(state))]
pub async fn run(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<Json<CollationSummary>, (StatusCode, String)> {
    let (extraction, collation) = data_dirs(&state, &token)?;
    let summary = service::collate(&extraction, &collation).map_err(from_anyhow)?;
    Ok(Json(summary))
}

#[instrument(skip(state))]
pub async fn status(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<Json<CollateStatus>, (StatusCode, String)> {
    let (extraction, collation) = data_dirs(&state, &token)?;
    Ok(Json(CollateStatus {
        shop_files: service::find_receipt_files(&extraction, ArtifactKind::ShopInfoBin).len(),
        items_files: service::find_receipt_files(&extraction, ArtifactKind::ItemsInfoBin).len(),
        collated: service::is_collated(&collation),
    }))
}

#[instrument(skip(state))]
pub async fn shops_csv(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (_extraction, collation) = data_dirs(&state, &token)?;
    let (shops, _items) = service::load_compiled(&collation).map_err(from_anyhow)?;
    let csv = service::shops_csv(&shops).map_err(internal)?;
    Ok(csv_response("shops.csv", csv))
}

#[instrument(skip(state))]
pub async fn items_csv(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (_extraction, collation) = data_dirs(&state, &token)?;
    let (_shops, items) = service::load_compiled(&collation).map_err(from_anyhow)?;
    let csv = service::items_csv(&items).map_err(internal)?;
    Ok(csv_response("items.csv", csv))
}

fn csv_response(file_name: &str, csv: String) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        csv,
    )
}

#[instrument(skip(state))]
pub async fn archive(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (extraction, collation) = data_dirs(&state, &token)?;
    if !service::is_collated(&collation) {
        return Err(WizardError::NotCollated.into());
    }
    let bytes = service::create_archive(&extraction, &collation).map_err(internal)?;
    Ok(download_response(
        "application/zip",
        service::ARCHIVE_FILE_NAME,
        bytes,
    ))
}

#[instrument(skip(state))]
pub async fn workbook(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (_extraction, collation) = data_dirs(&state, &token)?;
    let bytes = service::create_workbook(&collation).map_err(from_anyhow)?;
    Ok(download_response(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        service::WORKBOOK_FILE_NAME,
        bytes,
    ))
}

fn download_response(content_type: &str, file_name: &str, bytes: Vec<u8>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
}

#[instrument(skip(state))]
pub async fn cleanup(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<StatusCode, (StatusCode, String)> {
    let (extraction, collation) = data_dirs(&state, &token)?;
    service::cleanup(&extraction, &collation).map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}
