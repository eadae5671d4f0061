//! Request and response values exchanged between components.
//!
//! # Design
//! `BuiltRequest` is what the builder produces: a resolved URI, headers and a
//! typed payload that still knows whether it is text, a stream, a
//! pass-through object or a form. The dispatcher lowers it into a
//! `WireRequest`, whose body is plain bytes, a reader or a multipart form,
//! before handing it to the transport. `RawResponse` comes back with the body still unread.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use url::Url;

use crate::args::ComplexValue;
use crate::error::SerializationWarning;
use crate::form::{FormBody, Resource};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body as chosen by the body mode.
#[derive(Debug)]
pub enum Payload {
    Absent,
    Text(String),
    Stream(Resource),
    /// A structured value handed to a registered body encoder as-is.
    Object(Arc<dyn ComplexValue>),
    Form(FormBody),
}

/// A fully resolved request, built fresh for every call.
#[derive(Debug)]
pub struct BuiltRequest {
    pub method: HttpMethod,
    pub uri: Url,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
    pub warnings: Vec<SerializationWarning>,
}

impl BuiltRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Value of a query parameter; the first one when repeated.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.uri
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Body handed to the transport.
pub enum WireBody {
    Empty,
    Bytes(Vec<u8>),
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
    /// Form with file or JSON parts; the transport frames and streams it.
    Multipart(FormBody),
}

impl fmt::Debug for WireBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireBody::Empty => f.write_str("Empty"),
            WireBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            WireBody::Stream { length, .. } => write!(f, "Stream(length={length:?})"),
            WireBody::Multipart(form) => write!(f, "Multipart({} fields)", form.len()),
        }
    }
}

/// A request ready for the transport.
#[derive(Debug)]
pub struct WireRequest {
    pub method: HttpMethod,
    pub uri: Url,
    pub headers: Vec<(String, String)>,
    pub body: WireBody,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response as returned by the transport, body unread.
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RawResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Read + 'static) -> Self {
        Self {
            status,
            headers,
            body: Box::new(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Lowercased media type without parameters.
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
