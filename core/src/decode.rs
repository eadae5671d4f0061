//! Response decoding.
//!
//! # Design
//! `Decoder` walks an ordered list of `MessageConverter`s and hands the body
//! to the first one that accepts the declared return type and the response
//! content type. Bodies are read straight from the transport's reader:
//! JSON is parsed incrementally and `ReturnType::Stream` passes the reader
//! through untouched, so media downloads are never buffered here.
//!
//! The upstream reports failures as a 2xx JSON envelope with a non-zero
//! `errcode`, including on endpoints that normally return binary data. The
//! envelope converter sits first and turns those into `ApiError::Api`.

use std::fmt;
use std::io::{Cursor, Read};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::descriptor::ReturnType;
use crate::error::ApiError;
use crate::http::RawResponse;
use crate::types::ApiStatus;

/// A decoded response body.
pub enum ResponseValue {
    Unit,
    Text(String),
    Bytes(Vec<u8>),
    /// Unread body; the caller owns it and closes it by dropping it.
    Stream(Box<dyn Read>),
    Json(serde_json::Value),
}

impl fmt::Debug for ResponseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseValue::Unit => f.write_str("Unit"),
            ResponseValue::Text(t) => f.debug_tuple("Text").field(t).finish(),
            ResponseValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ResponseValue::Stream(_) => f.write_str("Stream(..)"),
            ResponseValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
        }
    }
}

impl ResponseValue {
    /// Deserialize a `Json` value into `T`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            ResponseValue::Json(value) => {
                serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
            }
            other => Err(ApiError::Decode(format!("expected a JSON value, got {other:?}"))),
        }
    }

    pub fn into_text(self) -> Result<String, ApiError> {
        match self {
            ResponseValue::Text(text) => Ok(text),
            other => Err(ApiError::Decode(format!("expected text, got {other:?}"))),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, ApiError> {
        match self {
            ResponseValue::Bytes(bytes) => Ok(bytes),
            other => Err(ApiError::Decode(format!("expected bytes, got {other:?}"))),
        }
    }

    pub fn into_stream(self) -> Result<Box<dyn Read>, ApiError> {
        match self {
            ResponseValue::Stream(reader) => Ok(reader),
            other => Err(ApiError::Decode(format!("expected a stream, got {other:?}"))),
        }
    }
}

/// Converts a response body into a `ResponseValue`.
pub trait MessageConverter: Send + Sync {
    /// `content_type` is the lowercased media type without parameters.
    fn can_read(&self, return_type: ReturnType, content_type: Option<&str>) -> bool;

    fn read(&self, return_type: ReturnType, body: Box<dyn Read>) -> Result<ResponseValue, ApiError>;
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct == "application/json" || ct.ends_with("+json"))
}

fn read_to_end(mut body: Box<dyn Read>) -> Result<Vec<u8>, ApiError> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)?;
    Ok(buf)
}

fn parse_json(body: Box<dyn Read>) -> Result<serde_json::Value, ApiError> {
    serde_json::from_reader(body).map_err(|e| ApiError::Decode(format!("malformed JSON: {e}")))
}

/// Error envelopes are a few dozen bytes; larger JSON bodies are passed on
/// without being parsed.
const ENVELOPE_PEEK_LIMIT: u64 = 64 * 1024;

/// JSON answers to non-JSON return types: either an error envelope or a
/// success acknowledgement.
struct EnvelopeConverter;

impl MessageConverter for EnvelopeConverter {
    fn can_read(&self, return_type: ReturnType, content_type: Option<&str>) -> bool {
        return_type != ReturnType::Json && is_json(content_type)
    }

    fn read(&self, return_type: ReturnType, mut body: Box<dyn Read>) -> Result<ResponseValue, ApiError> {
        let mut prefix = Vec::new();
        (&mut body)
            .take(ENVELOPE_PEEK_LIMIT + 1)
            .read_to_end(&mut prefix)?;
        if prefix.len() as u64 <= ENVELOPE_PEEK_LIMIT {
            let value: serde_json::Value = serde_json::from_slice(&prefix)
                .map_err(|e| ApiError::Decode(format!("malformed JSON: {e}")))?;
            ApiStatus::check(&value)?;
        } else {
            debug!(
                limit = ENVELOPE_PEEK_LIMIT,
                "JSON body too large for an envelope, passing it through"
            );
        }
        let mut rest = Cursor::new(prefix).chain(body);
        Ok(match return_type {
            ReturnType::Unit => {
                std::io::copy(&mut rest, &mut std::io::sink())?;
                ResponseValue::Unit
            }
            ReturnType::Text => {
                let bytes = read_to_end(Box::new(rest))?;
                ResponseValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            ReturnType::Bytes => ResponseValue::Bytes(read_to_end(Box::new(rest))?),
            ReturnType::Stream => ResponseValue::Stream(Box::new(rest)),
            ReturnType::Json => ResponseValue::Json(parse_json(Box::new(rest))?),
        })
    }
}

/// `ReturnType::Json`. The upstream sometimes labels JSON as `text/plain`.
struct JsonConverter;

impl MessageConverter for JsonConverter {
    fn can_read(&self, return_type: ReturnType, content_type: Option<&str>) -> bool {
        return_type == ReturnType::Json
            && (content_type.is_none() || content_type == Some("text/plain") || is_json(content_type))
    }

    fn read(&self, _: ReturnType, body: Box<dyn Read>) -> Result<ResponseValue, ApiError> {
        let value = parse_json(body)?;
        ApiStatus::check(&value)?;
        Ok(ResponseValue::Json(value))
    }
}

struct TextConverter;

impl MessageConverter for TextConverter {
    fn can_read(&self, return_type: ReturnType, _: Option<&str>) -> bool {
        return_type == ReturnType::Text
    }

    fn read(&self, _: ReturnType, body: Box<dyn Read>) -> Result<ResponseValue, ApiError> {
        let bytes = read_to_end(body)?;
        String::from_utf8(bytes)
            .map(ResponseValue::Text)
            .map_err(|e| ApiError::Decode(format!("body is not UTF-8: {e}")))
    }
}

struct BytesConverter;

impl MessageConverter for BytesConverter {
    fn can_read(&self, return_type: ReturnType, _: Option<&str>) -> bool {
        return_type == ReturnType::Bytes
    }

    fn read(&self, _: ReturnType, body: Box<dyn Read>) -> Result<ResponseValue, ApiError> {
        read_to_end(body).map(ResponseValue::Bytes)
    }
}

struct StreamConverter;

impl MessageConverter for StreamConverter {
    fn can_read(&self, return_type: ReturnType, _: Option<&str>) -> bool {
        return_type == ReturnType::Stream
    }

    fn read(&self, _: ReturnType, body: Box<dyn Read>) -> Result<ResponseValue, ApiError> {
        Ok(ResponseValue::Stream(body))
    }
}

struct UnitConverter;

impl MessageConverter for UnitConverter {
    fn can_read(&self, return_type: ReturnType, _: Option<&str>) -> bool {
        return_type == ReturnType::Unit
    }

    fn read(&self, _: ReturnType, mut body: Box<dyn Read>) -> Result<ResponseValue, ApiError> {
        std::io::copy(&mut body, &mut std::io::sink())?;
        Ok(ResponseValue::Unit)
    }
}

/// Ordered converter chain.
pub struct Decoder {
    converters: Vec<Box<dyn MessageConverter>>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            converters: vec![
                Box::new(EnvelopeConverter),
                Box::new(JsonConverter),
                Box::new(TextConverter),
                Box::new(BytesConverter),
                Box::new(StreamConverter),
                Box::new(UnitConverter),
            ],
        }
    }
}

impl Decoder {
    /// A decoder with no converters at all.
    pub fn empty() -> Self {
        Self {
            converters: Vec::new(),
        }
    }

    /// Add a converter ahead of the existing ones.
    pub fn with_converter(mut self, converter: impl MessageConverter + 'static) -> Self {
        self.converters.insert(0, Box::new(converter));
        self
    }

    pub fn decode(
        &self,
        response: RawResponse,
        return_type: ReturnType,
    ) -> Result<ResponseValue, ApiError> {
        let content_type = response.content_type();
        let converter = self
            .converters
            .iter()
            .find(|c| c.can_read(return_type, content_type.as_deref()))
            .ok_or_else(|| {
                ApiError::Decode(format!(
                    "no converter for {return_type:?} from content type {}",
                    content_type.as_deref().unwrap_or("<none>")
                ))
            })?;
        debug!(?return_type, content_type = ?content_type, status = response.status, "decoding response");
        converter.read(return_type, response.body)
    }
}
