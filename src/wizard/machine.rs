//! Transition rules of the receipt wizard.
//!
//! Handlers do the IO; the functions here are the only place session steps
//! change, so the whole table stays testable without a running server.

use tracing::{debug, error};

use crate::artifacts::ReceiptHandler;
use crate::error::WizardError;
use crate::session::{identify_image_processing_state, Step, WizardSession};

/// Guard: the requested action must match the session's current step.
pub fn expect_step(session: &WizardSession, expected: Step) -> Result<(), WizardError> {
    if session.step != expected {
        return Err(WizardError::StepMismatch {
            expected,
            actual: session.step,
        });
    }
    Ok(())
}

/// The active handler, or a loud failure: reaching a processing step without
/// one is a bug, not a user error.
pub fn active_handler(session: &mut WizardSession) -> Result<&mut ReceiptHandler, WizardError> {
    let step = session.step;
    match session.handler.as_mut() {
        Some(handler) => Ok(handler),
        None => {
            error!(%step, "entered a processing step without an active image handler");
            Err(WizardError::MissingHandler(step))
        }
    }
}

/// UPLOAD → ROTATE or WRANGLE, depending on what the (possibly resumed)
/// handler already carries.
pub fn attach_upload(session: &mut WizardSession, handler: ReceiptHandler) {
    session.step = identify_image_processing_state(&handler);
    session.handler = Some(handler);
    debug!(step = %session.step, "upload attached");
}

/// ROTATE → CROP.
pub fn advance_after_rotate(session: &mut WizardSession) {
    session.step = Step::Crop;
}

/// CROP → EXTRACT. Extraction runs automatically on entry; the caller is
/// expected to perform it and then advance again.
pub fn advance_after_crop(session: &mut WizardSession) {
    session.step = Step::Extract;
}

/// EXTRACT → WRANGLE.
pub fn advance_after_extract(session: &mut WizardSession) {
    session.step = Step::Wrangle;
}

/// WRANGLE → DONE, and DONE immediately advances back to UPLOAD for the next
/// receipt. The finished handler is detached rather than left stale.
pub fn complete_wrangle(session: &mut WizardSession) {
    session.step = Step::Done;
    debug!("receipt done, resetting for the next upload");
    session.handler = None;
    session.step = Step::Upload;
}
