// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Discovery errors --
    #[error("no scanner found on any interface")]
    NoDeviceFound,

    #[error("no scanner named \"{0}\" is currently available")]
    DeviceNotFound(String),

    // -- Session errors --
    /// The device is held open by another process.  Recoverable: the
    /// session retries when the device layer reports it became available.
    #[error("scanner is in use by another process")]
    DeviceBusy,

    #[error("session failed: {0}")]
    Session(String),

    // -- Negotiation errors --
    #[error("resolution {0} dpi is not supported and the unit reports no alternatives")]
    UnsupportedResolution(u32),

    #[error("color mode not supported: {0}")]
    UnsupportedColorMode(String),

    #[error("page size not supported: {0}")]
    UnsupportedPageSize(String),

    // -- Capture errors --
    #[error("no pages loaded in the document feeder")]
    NoPagesInFeeder,

    #[error("capture failed: {0}")]
    Capture(String),

    /// The device reported successful completion without delivering a
    /// single strip.  A device-layer logic fault, not a user error.
    #[error("image assembly failed: {0}")]
    ImageAssembly(String),

    #[error("operation timed out")]
    Timeout,

    // -- Ambient --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;

/// Classification of errors for caller-side retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Busy device, timeout — safe to retry automatically.
    Transient,
    /// User must take action (load paper, pick another device).
    UserAction,
    /// Permanent failure — unsupported configuration, device fault.
    Permanent,
}

/// Classify a `ScanwerkError` into an `ErrorClass`.
///
/// `DeviceBusy` is already retried inside the session state machine; it
/// only escapes when the overall timeout elapsed first, so callers seeing
/// it (or `Timeout`) may simply try again later.
pub fn classify_error(err: &ScanwerkError) -> ErrorClass {
    match err {
        ScanwerkError::DeviceBusy | ScanwerkError::Timeout => ErrorClass::Transient,

        ScanwerkError::NoDeviceFound
        | ScanwerkError::DeviceNotFound(_)
        | ScanwerkError::NoPagesInFeeder => ErrorClass::UserAction,

        ScanwerkError::UnsupportedResolution(_)
        | ScanwerkError::UnsupportedColorMode(_)
        | ScanwerkError::UnsupportedPageSize(_)
        | ScanwerkError::ImageAssembly(_)
        | ScanwerkError::Serialization(_) => ErrorClass::Permanent,

        // Session/capture wrap an underlying device cause — usually a
        // transient hardware hiccup (cable pulled, lid opened mid-pass).
        ScanwerkError::Session(_) | ScanwerkError::Capture(_) => ErrorClass::Transient,

        ScanwerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
                ErrorClass::Transient
            }
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::UserAction
            }
            _ => ErrorClass::Transient,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_timeout_are_transient() {
        assert_eq!(classify_error(&ScanwerkError::DeviceBusy), ErrorClass::Transient);
        assert_eq!(classify_error(&ScanwerkError::Timeout), ErrorClass::Transient);
    }

    #[test]
    fn empty_feeder_needs_user_action() {
        assert_eq!(
            classify_error(&ScanwerkError::NoPagesInFeeder),
            ErrorClass::UserAction
        );
    }

    #[test]
    fn assembly_fault_is_permanent() {
        let err = ScanwerkError::ImageAssembly("completion with zero strips".into());
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn display_names_the_device() {
        let err = ScanwerkError::DeviceNotFound("Epson WF-3520".into());
        assert!(err.to_string().contains("Epson WF-3520"));
    }
}
