//! Wire DTOs shared with the upstream API.
//!
//! The upstream wraps failures in a 2xx body of the form
//! `{"errcode": 40001, "errmsg": "..."}`; successful payloads either omit
//! `errcode` or set it to zero.

use serde::Deserialize;

use crate::error::ApiError;

/// The `errcode`/`errmsg` envelope carried by upstream responses.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ApiStatus {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

impl ApiStatus {
    /// Inspect a decoded JSON body and raise `ApiError::Api` for non-zero codes.
    pub fn check(value: &serde_json::Value) -> Result<(), ApiError> {
        let code = value
            .get("errcode")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        if code == 0 {
            return Ok(());
        }
        let message = value
            .get("errmsg")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        Err(ApiError::Api { code, message })
    }
}

/// Response of the token endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}
