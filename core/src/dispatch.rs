//! Dispatch: payload lowering and the transport call.
//!
//! A `BuiltRequest` payload is turned into bytes or a reader here. Forms pick
//! their own encoding: url-encoded when every value is text, otherwise a
//! multipart body that the transport frames (and sets the boundary for).
//! Pass-through objects go to the first `BodyEncoder` that accepts the
//! request's content type.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::args::ComplexValue;
use crate::builder::ACCESS_TOKEN_PARAM;
use crate::error::ApiError;
use crate::http::{BuiltRequest, Payload, RawResponse, WireBody, WireRequest};
use crate::transport::Transport;

/// Encodes a pass-through object for a given content type.
pub trait BodyEncoder: Send + Sync {
    fn can_write(&self, content_type: &str) -> bool;

    fn write(&self, value: &dyn ComplexValue) -> Result<Vec<u8>, ApiError>;
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    encoders: Vec<Box<dyn BodyEncoder>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            encoders: Vec::new(),
        }
    }

    pub fn with_encoder(mut self, encoder: impl BodyEncoder + 'static) -> Self {
        self.encoders.push(Box::new(encoder));
        self
    }

    pub fn dispatch(&self, request: BuiltRequest) -> Result<RawResponse, ApiError> {
        let wire = self.lower(request)?;
        debug!(method = %wire.method, url = %redact(&wire.uri), body = ?wire.body, "dispatching request");
        let response = self.transport.send(wire)?;
        debug!(status = response.status, "response received");
        Ok(response)
    }

    /// Turn the typed payload into a wire body, adding headers the body implies.
    pub fn lower(&self, request: BuiltRequest) -> Result<WireRequest, ApiError> {
        let BuiltRequest {
            method,
            uri,
            mut headers,
            payload,
            ..
        } = request;
        let body = match payload {
            Payload::Absent => WireBody::Empty,
            Payload::Text(text) => WireBody::Bytes(text.into_bytes()),
            Payload::Stream(resource) => {
                if !has_content_type(&headers) {
                    headers.push(content_type("application/octet-stream"));
                }
                let length = resource.content_length();
                WireBody::Stream {
                    reader: resource.open()?,
                    length,
                }
            }
            Payload::Object(value) => {
                let ct = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let encoder = self
                    .encoders
                    .iter()
                    .find(|e| e.can_write(&ct))
                    .ok_or_else(|| ApiError::Encode(format!("no body encoder for `{ct}`")))?;
                WireBody::Bytes(encoder.write(value.as_ref())?)
            }
            Payload::Form(form) if form.is_plain() => {
                headers.push(content_type("application/x-www-form-urlencoded"));
                WireBody::Bytes(form.to_urlencoded().into_bytes())
            }
            Payload::Form(form) => WireBody::Multipart(form),
        };
        Ok(WireRequest {
            method,
            uri,
            headers,
            body,
        })
    }
}

fn content_type(value: &str) -> (String, String) {
    ("content-type".to_string(), value.to_string())
}

fn has_content_type(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
}

/// URL with the access token masked, for logs.
pub(crate) fn redact(uri: &Url) -> String {
    let mut redacted = uri.clone();
    let pairs: Vec<(String, String)> = uri
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == ACCESS_TOKEN_PARAM {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::form::{FormBody, FormValue, Resource};
    use crate::http::HttpMethod;

    struct NoTransport;

    impl Transport for NoTransport {
        fn send(&self, _: WireRequest) -> Result<RawResponse, ApiError> {
            Err(ApiError::Transport("offline".to_string()))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(NoTransport))
    }

    fn request(headers: Vec<(String, String)>, payload: Payload) -> BuiltRequest {
        BuiltRequest {
            method: HttpMethod::Post,
            uri: Url::parse("http://localhost/x?access_token=T").unwrap(),
            headers,
            payload,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn plain_form_is_urlencoded() {
        let mut form = FormBody::new();
        form.add("a", FormValue::Text("x y".to_string()));
        form.add("a", FormValue::Text("z".to_string()));
        let wire = dispatcher().lower(request(Vec::new(), Payload::Form(form))).unwrap();
        assert_eq!(wire.header("content-type"), Some("application/x-www-form-urlencoded"));
        assert!(matches!(wire.body, WireBody::Bytes(b) if b == b"a=x+y&a=z"));
    }

    #[test]
    fn file_form_is_left_to_the_transport() {
        let mut form = FormBody::new();
        form.add("title", FormValue::Text("t".to_string()));
        form.add(
            "media",
            FormValue::File(Resource::from_reader(Box::new(&b"abc"[..])).with_filename("a.txt")),
        );
        let wire = dispatcher().lower(request(Vec::new(), Payload::Form(form))).unwrap();
        // The transport owns the boundary, so no content type is fixed here.
        assert_eq!(wire.header("content-type"), None);
        let WireBody::Multipart(form) = wire.body else {
            panic!("expected a multipart body");
        };
        assert_eq!(form.names().collect::<Vec<_>>(), vec!["title", "media"]);
    }

    #[test]
    fn stream_payload_defaults_to_octet_stream() {
        let resource = Resource::from_reader(Box::new(&b"raw"[..])).with_content_length(3);
        let wire = dispatcher().lower(request(Vec::new(), Payload::Stream(resource))).unwrap();
        assert_eq!(wire.header("content-type"), Some("application/octet-stream"));
        assert!(matches!(wire.body, WireBody::Stream { length: Some(3), .. }));
    }

    #[test]
    fn object_without_encoder_is_encode_error() {
        let headers = vec![content_type("text/xml")];
        let payload = Payload::Object(Arc::new(serde_json::json!({"ToUserName": "u"})));
        let err = dispatcher().lower(request(headers, payload)).unwrap_err();
        assert!(matches!(err, ApiError::Encode(msg) if msg.contains("text/xml")));
    }

    #[test]
    fn transport_errors_propagate() {
        let err = dispatcher()
            .dispatch(request(Vec::new(), Payload::Absent))
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[test]
    fn redact_masks_token_only() {
        let uri = Url::parse("http://h/p?type=image&access_token=SECRET").unwrap();
        let redacted = redact(&uri);
        assert!(!redacted.contains("SECRET"));
        assert!(redacted.contains("type=image"));
    }
}
