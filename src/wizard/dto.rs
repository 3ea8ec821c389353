use serde::{Deserialize, Serialize};

use crate::receipt::Receipt;
use crate::session::Step;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    /// Base64 of the image file as uploaded, jpeg or png.
    pub image_b64: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub step: Step,
    pub target_directory: String,
    /// True when the same bytes were seen before and stored artifacts were
    /// picked up instead of starting over.
    pub resumed: bool,
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub angle: f32,
    /// The rotated image, rendered client side.
    pub image_b64: String,
}

#[derive(Debug, Deserialize)]
pub struct CropRequest {
    /// The cropped image, rendered client side.
    pub image_b64: String,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub step: Step,
}

#[derive(Debug, Serialize)]
pub struct CropResponse {
    pub step: Step,
    /// The extraction result; crop runs extraction automatically.
    pub receipt: Receipt,
}

#[derive(Debug, Deserialize)]
pub struct WrangleRequest {
    pub receipt: Receipt,
}

#[derive(Debug, Serialize)]
pub struct WizardStatus {
    pub step: Step,
    pub username: Option<String>,
    pub target_directory: Option<String>,
    pub has_extracted: bool,
}
