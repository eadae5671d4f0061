//! Declarative executor for an access-token authenticated HTTP API.
//!
//! # Overview
//! An API operation is described once by a `RequestDescriptor`: method, URL
//! template, the role of each argument and the declared return type.
//! `Executor::execute` turns a descriptor plus runtime arguments into a
//! request, injects a fresh `access_token`, sends it through a `Transport`
//! and decodes the response.
//!
//! # Design
//! - Argument roles and kinds are declared up front; nothing is inferred from
//!   runtime types.
//! - JSON, XML and form bodies share one dispatch path. File-like arguments
//!   are streamed, never buffered.
//! - I/O is confined to `Transport` (`ReqwestTransport` by default) and the
//!   credential source, so every other component is deterministic.
//! - An expired token is handled by `with_credential_retry`, a decorator
//!   around a single execution pass.

pub mod args;
pub mod builder;
pub mod config;
pub mod credential;
pub mod decode;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod form;
pub mod http;
pub mod transport;
pub mod types;

pub use args::{Arg, ComplexValue, FileArg, Scalar};
pub use builder::{RequestBuilder, ACCESS_TOKEN_PARAM};
pub use config::{ClientConfig, SerializationPolicy};
pub use credential::{
    AppSecretSource, CachedCredential, CredentialProvider, IssuedToken, StaticCredential,
    TokenSource,
};
pub use decode::{Decoder, MessageConverter, ResponseValue};
pub use descriptor::{
    ArgKind, BodyMode, FileKind, ParamRole, ParameterBinding, RequestDescriptor, ReturnType,
};
pub use dispatch::{BodyEncoder, Dispatcher};
pub use error::{ApiError, BindingError, SerializationWarning};
pub use executor::{with_credential_retry, Executor};
pub use form::{FormBody, FormValue, LazyReader, Resource};
pub use http::{BuiltRequest, HttpMethod, Payload, RawResponse, WireBody, WireRequest};
pub use transport::Transport;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
pub use types::{AccessToken, ApiStatus};
