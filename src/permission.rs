//! Permission gate.
//!
//! Capture needs two grants: storage write access (asked for on resume)
//! and the per-session screen capture consent. A storage denial is
//! terminal; the host surface is closed and the feature stays off.

use crate::host::{ConsentHandle, PermissionHost, CAPTURE_CONSENT_REQUEST, STORAGE_PERMISSION_REQUEST};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageState {
    #[default]
    Unknown,
    Requested,
    Granted,
    Denied,
}

#[derive(Debug, Default)]
pub struct PermissionGate {
    storage: StorageState,
    consent_pending: bool,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self) -> StorageState {
        self.storage
    }

    pub fn consent_pending(&self) -> bool {
        self.consent_pending
    }

    /// Checks storage access and asks for it when missing.
    pub fn on_resume(&mut self, host: &dyn PermissionHost) {
        match self.storage {
            StorageState::Denied => return,
            StorageState::Requested => {
                log::debug!("[PERMISSION] Storage request still outstanding");
                return;
            }
            StorageState::Unknown | StorageState::Granted => {}
        }

        if host.has_storage_permission() {
            self.storage = StorageState::Granted;
        } else {
            log::info!("[PERMISSION] Requesting storage access");
            self.storage = StorageState::Requested;
            host.request_storage_permission(STORAGE_PERMISSION_REQUEST);
        }
    }

    /// Shows the capture consent prompt if storage access is in place.
    pub fn request_consent(&mut self, host: &dyn PermissionHost) -> Result<(), PermissionError> {
        match self.storage {
            StorageState::Granted => {}
            StorageState::Denied => return Err(PermissionError::FeatureDisabled),
            StorageState::Unknown | StorageState::Requested => {
                return Err(PermissionError::StorageNotGranted)
            }
        }
        self.consent_pending = true;
        host.request_capture_consent(CAPTURE_CONSENT_REQUEST);
        Ok(())
    }

    /// Handles the answer to a storage request.
    pub fn on_permission_result(&mut self, host: &dyn PermissionHost, request_code: i32, granted: bool) {
        if request_code != STORAGE_PERMISSION_REQUEST {
            log::debug!("[PERMISSION] Ignoring result for request {}", request_code);
            return;
        }
        if granted {
            log::info!("[PERMISSION] Storage access granted");
            self.storage = StorageState::Granted;
        } else {
            log::warn!("[PERMISSION] Storage access denied; capture is unavailable");
            self.storage = StorageState::Denied;
            host.close_surface();
        }
    }

    /// Returns the consent handle if it may be used to start a session.
    pub fn on_consent_result(
        &mut self,
        request_code: i32,
        consent: Option<ConsentHandle>,
    ) -> Option<ConsentHandle> {
        if request_code != CAPTURE_CONSENT_REQUEST {
            log::debug!("[PERMISSION] Ignoring result for request {}", request_code);
            return None;
        }
        self.consent_pending = false;

        let Some(consent) = consent else {
            log::info!("[PERMISSION] Screen capture consent denied");
            return None;
        };
        if self.storage != StorageState::Granted {
            log::warn!("[PERMISSION] Consent arrived without storage access; ignoring");
            return None;
        }
        Some(consent)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Storage permission has not been granted yet")]
    StorageNotGranted,

    #[error("Storage permission was denied; capture is disabled")]
    FeatureDisabled,
}
