use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use image::DynamicImage;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::artifacts::{self, ReceiptHandler};
use crate::auth::handlers::SessionAuth;
use crate::error::internal;
use crate::receipt::Receipt;
use crate::session::{Step, WizardSession};
use crate::state::AppState;
use crate::wizard::dto::{
    CropRequest, CropResponse, RotateRequest, StepResponse, UploadRequest, UploadResponse,
    WizardStatus, WrangleRequest,
};
use crate::wizard::machine;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wizard", get(status))
        .route("/wizard/upload", post(upload))
        .route("/wizard/rotate", post(rotate))
        .route("/wizard/crop", post(crop))
        .route("/wizard/extract", post(extract))
        .route("/wizard/wrangle", post(wrangle))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

fn get_session(state: &AppState, token: &Uuid) -> Result<WizardSession, (StatusCode, String)> {
    state
        .sessions
        .get(token)
        .ok_or((StatusCode::UNAUTHORIZED, "Not logged in".into()))
}

fn decode_image(image_b64: &str) -> Result<(Bytes, DynamicImage), (StatusCode, String)> {
    let bytes = BASE64
        .decode(image_b64)
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid base64".to_string()))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|_| (StatusCode::BAD_REQUEST, "not a decodable image".to_string()))?;
    Ok((Bytes::from(bytes), image))
}

#[instrument(skip(state))]
pub async fn status(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<Json<WizardStatus>, (StatusCode, String)> {
    let session = get_session(&state, &token)?;
    Ok(Json(WizardStatus {
        step: session.step,
        username: session.username.clone(),
        target_directory: session
            .handler
            .as_ref()
            .map(|h| h.target_directory.display().to_string()),
        has_extracted: session
            .handler
            .as_ref()
            .is_some_and(|h| h.extracted.is_some()),
    }))
}

#[instrument(skip(state, payload))]
pub async fn upload(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut session = get_session(&state, &token)?;
    machine::expect_step(&session, Step::Upload)?;

    let file_name = payload.file_name.trim();
    if file_name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "file_name is required".into()));
    }
    // the file name becomes part of a directory name
    if file_name.contains(['/', '\\']) || file_name.contains("..") {
        return Err((StatusCode::BAD_REQUEST, "file_name must be a plain name".into()));
    }

    let (bytes, _image) = decode_image(&payload.image_b64)?;

    let extraction_dir = state.config.data.extraction_dir(session.username.as_deref());
    let resumed = artifacts::target_directory(&extraction_dir, file_name, &bytes).exists();

    let handler =
        ReceiptHandler::from_upload(&extraction_dir, file_name, bytes).map_err(internal)?;
    handler.save(true, false).map_err(internal)?;

    info!(dir = %handler.target_directory.display(), resumed, "image uploaded");
    machine::attach_upload(&mut session, handler);

    let response = UploadResponse {
        step: session.step,
        target_directory: session
            .handler
            .as_ref()
            .map(|h| h.target_directory.display().to_string())
            .unwrap_or_default(),
        resumed,
        receipt: session.handler.as_ref().and_then(|h| h.extracted.clone()),
    };
    state.sessions.put(token, session);
    Ok(Json(response))
}

#[instrument(skip(state, payload))]
pub async fn rotate(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
    Json(payload): Json<RotateRequest>,
) -> Result<Json<StepResponse>, (StatusCode, String)> {
    let mut session = get_session(&state, &token)?;
    machine::expect_step(&session, Step::Rotate)?;

    let (_bytes, image) = decode_image(&payload.image_b64)?;
    {
        let handler = machine::active_handler(&mut session)?;
        handler.rotated = true;
        handler.angle = payload.angle;
        handler.edited_image = Some(image);
        handler.save_edited_image(true).map_err(internal)?;
    }

    machine::advance_after_rotate(&mut session);
    let step = session.step;
    state.sessions.put(token, session);
    Ok(Json(StepResponse { step }))
}

#[instrument(skip(state, payload))]
pub async fn crop(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
    Json(payload): Json<CropRequest>,
) -> Result<Json<CropResponse>, (StatusCode, String)> {
    let mut session = get_session(&state, &token)?;
    machine::expect_step(&session, Step::Crop)?;

    let (_bytes, image) = decode_image(&payload.image_b64)?;
    {
        let handler = machine::active_handler(&mut session)?;
        handler.cropped = true;
        handler.edited_image = Some(image);
        handler.save_edited_image(true).map_err(internal)?;
    }

    // extraction runs automatically on entering the extract step
    machine::advance_after_crop(&mut session);
    let receipt = match run_extraction(&state, &mut session).await {
        Ok(receipt) => receipt,
        Err(e) => {
            // keep the session at the extract step so the client can retry
            state.sessions.put(token, session);
            return Err(e);
        }
    };

    let step = session.step;
    state.sessions.put(token, session);
    Ok(Json(CropResponse { step, receipt }))
}

/// Retry entry for a failed automatic extraction.
#[instrument(skip(state))]
pub async fn extract(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Result<Json<CropResponse>, (StatusCode, String)> {
    let mut session = get_session(&state, &token)?;
    machine::expect_step(&session, Step::Extract)?;

    let receipt = match run_extraction(&state, &mut session).await {
        Ok(receipt) => receipt,
        Err(e) => {
            state.sessions.put(token, session);
            return Err(e);
        }
    };

    let step = session.step;
    state.sessions.put(token, session);
    Ok(Json(CropResponse { step, receipt }))
}

async fn run_extraction(
    state: &AppState,
    session: &mut WizardSession,
) -> Result<Receipt, (StatusCode, String)> {
    let image_b64 = {
        let handler = machine::active_handler(session)?;
        handler.edited_image_base64().map_err(internal)?
    };

    info!("extracting receipt data");
    let receipt = state.extractor.extract(&image_b64).await.map_err(internal)?;

    {
        let handler = machine::active_handler(session)?;
        handler.extracted = Some(receipt.clone());
        handler.save_receipt_info(true).map_err(internal)?;
    }
    machine::advance_after_extract(session);
    Ok(receipt)
}

#[instrument(skip(state, payload))]
pub async fn wrangle(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
    Json(payload): Json<WrangleRequest>,
) -> Result<Json<StepResponse>, (StatusCode, String)> {
    let mut session = get_session(&state, &token)?;
    machine::expect_step(&session, Step::Wrangle)?;

    {
        let handler = machine::active_handler(&mut session)?;
        handler.extracted = Some(payload.receipt);
        // no overwrite: existing files win, skipped writes are logged
        handler.save_receipt_info(false).map_err(internal)?;
    }

    machine::complete_wrangle(&mut session);
    let step = session.step;
    state.sessions.put(token, session);
    Ok(Json(StepResponse { step }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gate::AuthGate;
    use crate::auth::ratelimit::RateLimiter;
    use crate::auth::store::{CredentialBackend, MemoryUserStore};
    use crate::config::{AnthropicConfig, AppConfig, DataConfig, RateLimitConfig};
    use crate::extract::CannedExtractor;
    use crate::receipt::{Item, Shop};
    use std::path::Path;
    use std::sync::Arc;

    fn canned_receipt() -> Receipt {
        Receipt {
            shop: Shop {
                name: "Lidl".into(),
                date_str: "2024-04-04".into(),
                time_str: "12:30".into(),
                total: 4.68,
            },
            items: vec![Item {
                name: "BIOD BANANEN".into(),
                price: 2.34,
                count: Some(2),
                mass: None,
                tax: Some("A".into()),
                category: None,
            }],
        }
    }

    fn test_state(root: &Path) -> AppState {
        let config = Arc::new(AppConfig {
            data: DataConfig {
                root_dir: root.to_path_buf(),
                extraction_subdir: "extractions".into(),
                collation_subdir: "collations".into(),
                use_user: true,
            },
            anthropic: AnthropicConfig {
                api_key: Some("sk-test".into()),
                key_file: None,
                model: "test-model".into(),
                max_tokens: 64,
                max_retries: 1,
            },
            rate_limit: RateLimitConfig {
                count: 100,
                window_secs: 60,
            },
            user_db_path: root.join("user.db"),
            database_url: None,
        });
        let backends: Vec<Box<dyn CredentialBackend>> =
            vec![Box::new(MemoryUserStore::available())];
        let gate = Arc::new(AuthGate::new(RateLimiter::new(100, 60), backends));
        let extractor = Arc::new(CannedExtractor::new(canned_receipt()));
        let state = AppState::from_parts(config, gate, extractor);
        state.config.data.ensure_dirs(Some("og")).unwrap();
        state
    }

    fn jpeg_b64() -> String {
        let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            8,
            8,
            image::Rgb([120, 90, 30]),
        ));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        BASE64.encode(bytes)
    }

    fn upload_request(image_b64: &str) -> Json<UploadRequest> {
        Json(UploadRequest {
            file_name: "receipt-1.jpg".into(),
            image_b64: image_b64.into(),
        })
    }

    async fn walk_to_wrangle(state: &AppState, token: Uuid, image: &str) -> Receipt {
        let Json(up) = upload(
            State(state.clone()),
            SessionAuth(token),
            upload_request(image),
        )
        .await
        .expect("upload");
        assert_eq!(up.step, Step::Rotate);
        assert!(!up.resumed);

        let Json(rot) = rotate(
            State(state.clone()),
            SessionAuth(token),
            Json(RotateRequest {
                angle: 90.0,
                image_b64: image.into(),
            }),
        )
        .await
        .expect("rotate");
        assert_eq!(rot.step, Step::Crop);

        let Json(cr) = crop(
            State(state.clone()),
            SessionAuth(token),
            Json(CropRequest {
                image_b64: image.into(),
            }),
        )
        .await
        .expect("crop");
        assert_eq!(cr.step, Step::Wrangle);
        cr.receipt
    }

    #[tokio::test]
    async fn full_flow_walks_back_to_upload_with_a_fresh_slate() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let token = state.sessions.create(WizardSession::logged_in("og"));
        let image = jpeg_b64();

        let receipt = walk_to_wrangle(&state, token, &image).await;
        assert_eq!(receipt, canned_receipt());

        let Json(done) = wrangle(
            State(state.clone()),
            SessionAuth(token),
            Json(WrangleRequest { receipt }),
        )
        .await
        .expect("wrangle");
        assert_eq!(done.step, Step::Upload);

        let session = state.sessions.get(&token).unwrap();
        assert!(session.handler.is_none());
    }

    #[tokio::test]
    async fn reuploading_the_same_bytes_resumes_at_wrangle() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let token = state.sessions.create(WizardSession::logged_in("og"));
        let image = jpeg_b64();

        let receipt = walk_to_wrangle(&state, token, &image).await;
        wrangle(
            State(state.clone()),
            SessionAuth(token),
            Json(WrangleRequest { receipt }),
        )
        .await
        .expect("wrangle");

        // same bytes, same file name: the stored extraction is picked up
        let Json(again) = upload(
            State(state.clone()),
            SessionAuth(token),
            upload_request(&image),
        )
        .await
        .expect("second upload");
        assert!(again.resumed);
        assert_eq!(again.step, Step::Wrangle);
        assert_eq!(again.receipt, Some(canned_receipt()));
    }

    #[tokio::test]
    async fn actions_in_the_wrong_step_conflict() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let token = state.sessions.create(WizardSession::logged_in("og"));

        let err = rotate(
            State(state.clone()),
            SessionAuth(token),
            Json(RotateRequest {
                angle: 0.0,
                image_b64: jpeg_b64(),
            }),
        )
        .await
        .expect_err("rotate before upload must fail");
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_handler_in_a_processing_step_is_a_server_error() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let mut session = WizardSession::logged_in("og");
        session.step = Step::Rotate; // corrupted on purpose: no handler attached
        let token = state.sessions.create(session);

        let err = rotate(
            State(state.clone()),
            SessionAuth(token),
            Json(RotateRequest {
                angle: 0.0,
                image_b64: jpeg_b64(),
            }),
        )
        .await
        .expect_err("must fail loudly");
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn file_names_that_escape_the_tree_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let token = state.sessions.create(WizardSession::logged_in("og"));

        let err = upload(
            State(state.clone()),
            SessionAuth(token),
            Json(UploadRequest {
                file_name: "../../etc/passwd".into(),
                image_b64: jpeg_b64(),
            }),
        )
        .await
        .expect_err("traversal names must be rejected");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn garbage_uploads_are_bad_requests() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let token = state.sessions.create(WizardSession::logged_in("og"));

        let err = upload(
            State(state.clone()),
            SessionAuth(token),
            Json(UploadRequest {
                file_name: "x.jpg".into(),
                image_b64: BASE64.encode(b"not an image at all"),
            }),
        )
        .await
        .expect_err("non-image bytes must be rejected");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
