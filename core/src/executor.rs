//! The executor: build, dispatch, check status, decode.
//!
//! # Design
//! `Executor::execute` performs exactly one pass and keeps no state between
//! calls. Recovering from an expired token is a separate policy,
//! `with_credential_retry`, which wraps any call returning `ApiError`:
//! when the upstream rejects the token it invalidates the credential and runs
//! the call once more. Because streamed arguments are consumed by the first
//! attempt, the retrying entry point takes an argument factory instead of an
//! argument list.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::args::Arg;
use crate::builder::RequestBuilder;
use crate::config::ClientConfig;
use crate::credential::CredentialProvider;
use crate::decode::{Decoder, MessageConverter, ResponseValue};
use crate::descriptor::{RequestDescriptor, ReturnType};
use crate::dispatch::{BodyEncoder, Dispatcher};
use crate::error::ApiError;
use crate::transport::Transport;

pub struct Executor {
    credentials: Arc<dyn CredentialProvider>,
    builder: RequestBuilder,
    dispatcher: Dispatcher,
    decoder: Decoder,
}

impl Executor {
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            builder: RequestBuilder::new(
                &config.base_url,
                Arc::clone(&credentials),
                config.serialization,
            ),
            credentials,
            dispatcher: Dispatcher::new(transport),
            decoder: Decoder::default(),
        }
    }

    /// Register a response converter ahead of the defaults.
    pub fn with_converter(mut self, converter: impl MessageConverter + 'static) -> Self {
        self.decoder = self.decoder.with_converter(converter);
        self
    }

    /// Register an encoder for pass-through request bodies.
    pub fn with_encoder(mut self, encoder: impl BodyEncoder + 'static) -> Self {
        self.dispatcher = self.dispatcher.with_encoder(encoder);
        self
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// One build/dispatch/decode pass.
    pub fn execute(
        &self,
        descriptor: &RequestDescriptor,
        args: Vec<Arg>,
    ) -> Result<ResponseValue, ApiError> {
        debug!(operation = descriptor.name(), "executing");
        let request = self.builder.build(descriptor, args)?;
        let response = self.dispatcher.dispatch(request)?;
        if !response.is_success() {
            return Err(ApiError::from_response(response));
        }
        self.decoder.decode(response, descriptor.return_type())
    }

    /// `execute` for JSON operations, deserializing into `T`.
    pub fn execute_as<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        args: Vec<Arg>,
    ) -> Result<T, ApiError> {
        if descriptor.return_type() != ReturnType::Json {
            return Err(ApiError::Decode(format!(
                "`{}` returns {:?}, not JSON",
                descriptor.name(),
                descriptor.return_type()
            )));
        }
        self.execute(descriptor, args)?.into_json()
    }

    /// `execute` with one retry after an expired-token response.
    pub fn execute_with_retry<F>(
        &self,
        descriptor: &RequestDescriptor,
        mut args: F,
    ) -> Result<ResponseValue, ApiError>
    where
        F: FnMut() -> Vec<Arg>,
    {
        with_credential_retry(self.credentials.as_ref(), || {
            self.execute(descriptor, args())
        })
    }
}

/// Run `call`; if it fails with an expired credential, invalidate the
/// credential and run it exactly once more.
pub fn with_credential_retry<T, F>(
    credentials: &dyn CredentialProvider,
    mut call: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Result<T, ApiError>,
{
    match call() {
        Err(err) if err.is_credential_expired() => {
            warn!(error = %err, "access token rejected, refreshing and retrying once");
            credentials.invalidate();
            call()
        }
        other => other,
    }
}
