//! Transport boundary.
//!
//! # Design
//! The rest of the crate never touches sockets: it produces `WireRequest`
//! values and consumes `RawResponse` values. `Transport` is the only seam
//! where I/O happens, which keeps the builder and decoder deterministic and
//! lets tests substitute an in-memory transport. Status codes are returned as
//! data, never as errors.

use crate::error::ApiError;
use crate::http::{RawResponse, WireRequest};

/// Executes one HTTP round trip.
pub trait Transport: Send + Sync {
    fn send(&self, request: WireRequest) -> Result<RawResponse, ApiError>;
}

#[cfg(feature = "reqwest")]
pub use self::blocking::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod blocking {
    use std::time::Duration;

    use reqwest::blocking::multipart::{Form, Part};
    use reqwest::blocking::{Body, Client};
    use reqwest::Method;

    use super::Transport;
    use crate::error::ApiError;
    use crate::form::{FormBody, FormValue};
    use crate::http::{HttpMethod, RawResponse, WireBody, WireRequest};

    /// Blocking transport backed by a shared `reqwest::blocking::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new(timeout: Option<Duration>) -> Result<Self, ApiError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(transport_error)?;
            Ok(Self { client })
        }

        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    fn transport_error(e: reqwest::Error) -> ApiError {
        ApiError::Transport(e.to_string())
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Head => Method::HEAD,
        }
    }

    /// Map a form onto reqwest parts. File parts keep their lazy reader, so a
    /// path is opened only when reqwest starts writing that part.
    fn multipart(form: FormBody) -> Result<Form, ApiError> {
        let mut multipart = Form::new();
        for (name, value) in form.into_parts() {
            let part = match value {
                FormValue::Text(text) => Part::text(text).mime_str("text/plain;charset=UTF-8"),
                FormValue::Json(json) => Part::text(json).mime_str("application/json"),
                FormValue::File(resource) => {
                    let filename = resource.filename().unwrap_or(&name).to_string();
                    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
                    let part = match resource.content_length() {
                        Some(length) => {
                            Part::reader_with_length(resource.into_lazy_reader(), length)
                        }
                        None => Part::reader(resource.into_lazy_reader()),
                    };
                    part.file_name(filename).mime_str(mime.as_ref())
                }
            }
            .map_err(|e| ApiError::Encode(e.to_string()))?;
            multipart = multipart.part(name, part);
        }
        Ok(multipart)
    }

    impl Transport for ReqwestTransport {
        fn send(&self, request: WireRequest) -> Result<RawResponse, ApiError> {
            let mut builder = self
                .client
                .request(method(request.method), request.uri.as_str());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            // A built body is sent whatever the method, GET included.
            builder = match request.body {
                WireBody::Empty => builder,
                WireBody::Bytes(bytes) => builder.body(bytes),
                WireBody::Stream {
                    reader,
                    length: Some(length),
                } => builder.body(Body::sized(reader, length)),
                WireBody::Stream {
                    reader,
                    length: None,
                } => builder.body(Body::new(reader)),
                WireBody::Multipart(form) => builder.multipart(multipart(form)?),
            };
            let response = builder.send().map_err(transport_error)?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            Ok(RawResponse::new(status, headers, response))
        }
    }

}
