//! Request building.
//!
//! # Design
//! `RequestBuilder::build` turns a descriptor and its arguments into a
//! `BuiltRequest` in four steps: check every bound argument against its
//! declared kind, resolve the URL template, replace the `access_token` query
//! parameter with a freshly fetched token, and encode the body for the
//! descriptor's `BodyMode`.
//!
//! Arguments are taken by value. File-like arguments move into the request
//! payload on success; on any error they are dropped with the rest of the
//! argument vector, so every stream is closed exactly once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;
use url::Url;

use crate::args::{Arg, ComplexValue};
use crate::config::SerializationPolicy;
use crate::descriptor::{BodyMode, ParamRole, ParameterBinding, RequestDescriptor, ReturnType};
use crate::credential::CredentialProvider;
use crate::error::{ApiError, BindingError, SerializationWarning};
use crate::form::{FormBody, FormValue};
use crate::http::{BuiltRequest, Payload};

/// Reserved query parameter carrying the access token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

pub struct RequestBuilder {
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    policy: SerializationPolicy,
}

impl RequestBuilder {
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        policy: SerializationPolicy,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            policy,
        }
    }

    pub fn build(
        &self,
        descriptor: &RequestDescriptor,
        args: Vec<Arg>,
    ) -> Result<BuiltRequest, ApiError> {
        let mut args: Vec<Option<Arg>> = args.into_iter().map(Some).collect();
        for p in descriptor.parameters() {
            let arg = args
                .get(p.position)
                .and_then(Option::as_ref)
                .ok_or(BindingError::MissingArgument {
                    position: p.position,
                })?;
            if !arg.matches(p.kind) {
                return Err(BindingError::KindMismatch {
                    position: p.position,
                    expected: p.kind.label(),
                }
                .into());
            }
        }

        let mut uri = self.resolve_url(descriptor, &args)?;
        let token = self.credentials.token()?;
        replace_query_param(&mut uri, ACCESS_TOKEN_PARAM, &token);

        let mut headers = Vec::new();
        let mut warnings = Vec::new();
        let payload = match descriptor.body_mode() {
            BodyMode::None => Payload::Absent,
            BodyMode::Json => {
                headers.push(("content-type".to_string(), "application/json".to_string()));
                let p = body_parameter(descriptor)?;
                match take(&mut args, p) {
                    Arg::Complex(value) => self.json_body(p.position, value.as_ref(), &mut warnings)?,
                    other => simple_body(other),
                }
            }
            BodyMode::Xml => {
                headers.push(("content-type".to_string(), "text/xml".to_string()));
                let p = body_parameter(descriptor)?;
                match take(&mut args, p) {
                    // No XML serializer ships with the crate; a `BodyEncoder` decides.
                    Arg::Complex(value) => Payload::Object(value),
                    other => simple_body(other),
                }
            }
            BodyMode::Form => Payload::Form(self.form_body(descriptor, &mut args, &mut warnings)?),
        };
        if descriptor.return_type() == ReturnType::Json {
            headers.push(("accept".to_string(), "application/json".to_string()));
        }

        Ok(BuiltRequest {
            method: descriptor.method(),
            uri,
            headers,
            payload,
            warnings,
        })
    }

    fn resolve_url(
        &self,
        descriptor: &RequestDescriptor,
        args: &[Option<Arg>],
    ) -> Result<Url, ApiError> {
        let template = descriptor.url_template();
        let (path_template, query_template) = template.split_once('?').unwrap_or((template, ""));

        let value_of = |name: &str| -> Result<Option<String>, BindingError> {
            let p = descriptor
                .parameters()
                .iter()
                .filter(|p| matches!(p.role, ParamRole::Path | ParamRole::Query))
                .find(|p| p.resolve_name().ok() == Some(name))
                .ok_or_else(|| BindingError::UnresolvedPlaceholder(name.to_string()))?;
            Ok(scalar_text(args[p.position].as_ref()))
        };

        let mut consumed = HashSet::new();
        let path = substitute(path_template, |name| {
            consumed.insert(name.to_string());
            value_of(name)?
                .map(|v| urlencoding::encode(&v).into_owned())
                .ok_or_else(|| BindingError::NullPathValue(name.to_string()))
        })?;

        let mut uri = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| BindingError::InvalidUrl(format!("{}{path}: {e}", self.base_url)))?;

        let mut pairs: Vec<(String, String)> = Vec::new();
        for pair in query_template.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match placeholder(value) {
                Some(name) if name == ACCESS_TOKEN_PARAM => {}
                Some(name) => {
                    consumed.insert(name.to_string());
                    if let Some(v) = value_of(name)? {
                        pairs.push((key.to_string(), v));
                    }
                }
                None => pairs.push((key.to_string(), value.to_string())),
            }
        }
        for p in descriptor.parameters().iter().filter(|p| p.role == ParamRole::Query) {
            let name = p.resolve_name()?;
            if consumed.contains(name) {
                continue;
            }
            if let Some(v) = scalar_text(args[p.position].as_ref()) {
                pairs.push((name.to_string(), v));
            }
        }
        for p in descriptor.parameters().iter().filter(|p| p.role == ParamRole::Path) {
            let name = p.resolve_name()?;
            if !consumed.contains(name) {
                return Err(BindingError::InvalidDescriptor(format!(
                    "path parameter `{name}` has no placeholder in `{template}`"
                ))
                .into());
            }
        }
        if !pairs.is_empty() {
            uri.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(uri)
    }

    fn json_body(
        &self,
        position: usize,
        value: &dyn ComplexValue,
        warnings: &mut Vec<SerializationWarning>,
    ) -> Result<Payload, ApiError> {
        match value.to_json_string() {
            Ok(json) => Ok(Payload::Text(json)),
            Err(e) => {
                self.degrade(position, e, warnings)?;
                Ok(Payload::Absent)
            }
        }
    }

    fn form_body(
        &self,
        descriptor: &RequestDescriptor,
        args: &mut [Option<Arg>],
        warnings: &mut Vec<SerializationWarning>,
    ) -> Result<FormBody, ApiError> {
        let mut form = FormBody::new();
        for p in descriptor.form_parameters() {
            let name = p.resolve_name()?;
            let value = match take(args, p) {
                Arg::Null => continue,
                Arg::Scalar(s) => FormValue::Text(s.to_string()),
                Arg::Complex(value) => match value.to_json_string() {
                    Ok(json) => FormValue::Json(json),
                    Err(e) => {
                        self.degrade(p.position, e, warnings)?;
                        continue;
                    }
                },
                Arg::File(file) => FormValue::File(file.into_resource()),
            };
            form.add(name, value);
        }
        Ok(form)
    }

    /// Apply the serialization policy to a failed body or form value.
    fn degrade(
        &self,
        position: usize,
        error: serde_json::Error,
        warnings: &mut Vec<SerializationWarning>,
    ) -> Result<(), ApiError> {
        match self.policy {
            SerializationPolicy::FailFast => Err(ApiError::Serialization(format!(
                "argument {position}: {error}"
            ))),
            SerializationPolicy::Degrade => {
                warn!(position, %error, "could not serialize argument, omitting it");
                warnings.push(SerializationWarning {
                    position,
                    message: error.to_string(),
                });
                Ok(())
            }
        }
    }
}

fn body_parameter(descriptor: &RequestDescriptor) -> Result<&ParameterBinding, BindingError> {
    descriptor
        .body_parameter()
        .ok_or(BindingError::NoBodyParameter {
            mode: descriptor.body_mode(),
        })
}

/// Move an argument out; presence was checked up front.
fn take(args: &mut [Option<Arg>], p: &ParameterBinding) -> Arg {
    args.get_mut(p.position)
        .and_then(Option::take)
        .unwrap_or(Arg::Null)
}

/// Scalar, null or stream as a JSON/XML body.
fn simple_body(arg: Arg) -> Payload {
    match arg {
        Arg::Null => Payload::Text(String::new()),
        Arg::Scalar(s) => Payload::Text(s.to_string()),
        Arg::File(file) => Payload::Stream(file.into_resource()),
        Arg::Complex(value) => Payload::Object(value),
    }
}

fn scalar_text(arg: Option<&Arg>) -> Option<String> {
    match arg? {
        Arg::Scalar(s) => Some(s.to_string()),
        _ => None,
    }
}

fn placeholder(value: &str) -> Option<&str> {
    value.strip_prefix('{')?.strip_suffix('}')
}

/// Replace each `{name}` in `template` with `resolve(name)`.
fn substitute<F>(template: &str, mut resolve: F) -> Result<String, BindingError>
where
    F: FnMut(&str) -> Result<String, BindingError>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .map(|i| open + i)
            .ok_or_else(|| BindingError::InvalidUrl(format!("unclosed placeholder in `{template}`")))?;
        out.push_str(&rest[..open]);
        out.push_str(&resolve(&rest[open + 1..close])?);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Drop every `name` pair and append exactly one with `value`.
fn replace_query_param(uri: &mut Url, name: &str, value: &str) {
    let kept: Vec<(String, String)> = uri
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    uri.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(name, value);
}
