//! Error types for the API executor.
//!
//! # Design
//! Every failure of a single `execute` pass surfaces as one `ApiError`.
//! Binding problems get their own enum because they are raised before any
//! network traffic and are never worth retrying. Upstream failures come in
//! two shapes: a non-2xx status (`Response`) and a 2xx body carrying a non-zero
//! `errcode` (`Api`). Only the latter can signal an expired credential.

use std::io::{self, Read};

use thiserror::Error;

use crate::descriptor::BodyMode;
use crate::http::RawResponse;

/// Upstream codes meaning the access token is missing, invalid or expired.
pub const CREDENTIAL_EXPIRED_CODES: [i64; 3] = [40001, 40014, 42001];

/// Errors returned by the executor and its components.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A request could not be built from the descriptor and arguments.
    #[error("binding failed: {0}")]
    Binding(#[from] BindingError),

    /// The upstream returned a non-2xx status.
    #[error("HTTP {status}: {}", String::from_utf8_lossy(.body))]
    Response { status: u16, body: Vec<u8> },

    /// The upstream returned a 2xx envelope with a non-zero `errcode`.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },

    /// No converter matched, or the payload was malformed for the declared type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The request body could not be serialized (fail-fast policy only).
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// No body encoder accepts a pass-through payload.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The credential provider could not supply a token.
    #[error("credential unavailable: {0}")]
    Credential(String),

    /// The transport failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ApiError {
    /// Consume a non-2xx response into a `Response` error carrying its body.
    pub fn from_response(mut response: RawResponse) -> Self {
        let mut body = Vec::new();
        if let Err(e) = response.body.read_to_end(&mut body) {
            return ApiError::Io(e);
        }
        ApiError::Response {
            status: response.status,
            body,
        }
    }

    /// True when the upstream rejected the access token.
    pub fn is_credential_expired(&self) -> bool {
        matches!(self, ApiError::Api { code, .. } if CREDENTIAL_EXPIRED_CODES.contains(code))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// HTTP status for `Response` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Reasons a descriptor or argument list cannot be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("parameter {position} has neither an explicit name nor a declared identifier")]
    MissingName { position: usize },

    #[error("no argument supplied for parameter {position}")]
    MissingArgument { position: usize },

    #[error("argument {position} does not match its declared kind (expected {expected})")]
    KindMismatch { position: usize, expected: &'static str },

    #[error("no parameter is eligible as the {mode:?} body")]
    NoBodyParameter { mode: BodyMode },

    #[error("no parameter binds URL placeholder `{0}`")]
    UnresolvedPlaceholder(String),

    #[error("path parameter `{0}` is null")]
    NullPathValue(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

/// A JSON body or form part that failed to serialize and was omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationWarning {
    pub position: usize,
    pub message: String,
}
