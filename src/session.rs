//! Per-session wizard state.
//!
//! One `WizardSession` exists per logged-in session, created at login and
//! dropped at logout. Nothing here is persisted; losing the session returns
//! the user to the login step with no history.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifacts::ReceiptHandler;

/// Steps of the receipt wizard, in their usual order of appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Login,
    Upload,
    Rotate,
    Crop,
    Extract,
    Wrangle,
    Done,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Login => "login",
            Step::Upload => "upload",
            Step::Rotate => "rotate",
            Step::Crop => "crop",
            Step::Extract => "extract",
            Step::Wrangle => "wrangle",
            Step::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct WizardSession {
    pub step: Step,
    pub is_logged_in: bool,
    pub username: Option<String>,
    pub handler: Option<ReceiptHandler>,
}

impl Default for WizardSession {
    fn default() -> Self {
        Self {
            step: Step::Login,
            is_logged_in: false,
            username: None,
            handler: None,
        }
    }
}

impl WizardSession {
    pub fn logged_in(username: &str) -> Self {
        Self {
            step: Step::Upload,
            is_logged_in: true,
            username: Some(username.to_string()),
            handler: None,
        }
    }
}

/// Where to resume a rehydrated receipt: straight to data wrangling when the
/// extracted data is already on disk, otherwise back to the start of image
/// editing. Partial rotate/crop progress is deliberately not resumed.
pub fn identify_image_processing_state(handler: &ReceiptHandler) -> Step {
    if handler.extracted.is_some() {
        debug!("found extracted receipt data in handler, resuming at wrangle");
        return Step::Wrangle;
    }
    debug!("no extracted receipt data in handler, resuming at rotate");
    Step::Rotate
}
