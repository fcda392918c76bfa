//! Error types for the fingerprint poisoning engine
//!
//! Every failure in this crate degrades to "this particular surface is
//! unprotected" rather than aborting the engine. The taxonomy mirrors that:
//! - Patch installation failures (surface left unprotected)
//! - Unsupported platform features (surface becomes a no-op)
//! - Cross-context propagation failures (child left unprotected)
//! - Header rule synchronization failures (previous rules stay in effect)

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};

pub type Result<T> = std::result::Result<T, PoisonError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Surface errors (1xx)
    PatchFailed = 100,
    Unsupported = 101,

    // Propagation errors (2xx)
    PropagationFailed = 200,
    UntrustedSender = 201,

    // Network rule errors (3xx)
    RuleSyncFailed = 300,

    // Configuration errors (4xx)
    ConfigError = 400,

    // Internal errors (9xx)
    ScriptError = 900,
    InternalError = 901,
}

/// Main error type for the engine
#[derive(Error, Debug, Clone)]
pub enum PoisonError {
    // ===== Surface Errors =====
    #[error("Failed to patch {surface} surface: {reason}")]
    PatchFailed {
        surface: &'static str,
        reason: String,
    },

    #[error("Unsupported platform feature: {0}")]
    Unsupported(String),

    // ===== Propagation Errors =====
    #[error("Propagation failed: {0}")]
    Propagation(String),

    #[error("Untrusted handshake from origin {origin:?}")]
    UntrustedSender { origin: String },

    // ===== Network Rule Errors =====
    #[error("Header rule synchronization failed: {0}")]
    RuleSync(String),

    // ===== Configuration Errors =====
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ===== Internal Errors =====
    #[error("Script error: {0}")]
    Script(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoisonError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            PoisonError::PatchFailed { .. } => ErrorCode::PatchFailed,
            PoisonError::Unsupported(_) => ErrorCode::Unsupported,
            PoisonError::Propagation(_) => ErrorCode::PropagationFailed,
            PoisonError::UntrustedSender { .. } => ErrorCode::UntrustedSender,
            PoisonError::RuleSync(_) => ErrorCode::RuleSyncFailed,
            PoisonError::Config(_) => ErrorCode::ConfigError,
            PoisonError::Script(_) => ErrorCode::ScriptError,
            PoisonError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the engine keeps running normally after this error.
    ///
    /// Only configuration and internal errors indicate a bug on our side;
    /// everything else is an expected degradation of a single surface.
    pub fn is_degradation(&self) -> bool {
        !matches!(self, PoisonError::Config(_) | PoisonError::Internal(_))
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoisonError::RuleSync(_) | PoisonError::Script(_))
    }

    /// Wrap an arbitrary failure as a patch failure for `surface`
    pub fn patch(surface: &'static str, err: impl std::fmt::Display) -> Self {
        PoisonError::PatchFailed {
            surface,
            reason: err.to_string(),
        }
    }

    /// Best-effort human readable description of a thrown JS value
    pub fn describe_js(value: &JsValue) -> String {
        if let Some(s) = value.as_string() {
            return s;
        }
        if let Some(err) = value.dyn_ref::<js_sys::Error>() {
            return String::from(err.message());
        }
        if value.is_undefined() {
            return "undefined".into();
        }
        if value.is_null() {
            return "null".into();
        }
        format!("{:?}", value)
    }
}

impl From<JsValue> for PoisonError {
    fn from(value: JsValue) -> Self {
        PoisonError::Script(PoisonError::describe_js(&value))
    }
}

impl From<serde_wasm_bindgen::Error> for PoisonError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        PoisonError::Internal(err.to_string())
    }
}

impl From<PoisonError> for JsValue {
    fn from(err: PoisonError) -> Self {
        js_sys::Error::new(&err.to_string()).into()
    }
}

/// Error information for JavaScript consumption
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
    pub is_degradation: bool,
    pub is_retryable: bool,
}

impl From<&PoisonError> for ErrorInfo {
    fn from(err: &PoisonError) -> Self {
        ErrorInfo {
            code: err.code() as u32,
            message: err.to_string(),
            is_degradation: err.is_degradation(),
            is_retryable: err.is_retryable(),
        }
    }
}
