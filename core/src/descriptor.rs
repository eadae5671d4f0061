//! Statically declared operation metadata.
//!
//! # Design
//! A `RequestDescriptor` is built once, at registration time, and shared
//! read-only by every call. Each argument's role and kind are declared up
//! front in a `ParameterBinding`, so request building never inspects runtime
//! types to decide how a value is encoded.

use std::collections::HashSet;

use crate::error::BindingError;
use crate::http::HttpMethod;

/// Encoding strategy for the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    None,
    Json,
    Xml,
    Form,
}

/// What a parameter contributes to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    Path,
    Query,
    JsonBody,
    XmlBody,
    FormField,
    FormFile,
}

/// Shape of a file-like argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A named resource with an optional filename and length.
    Resource,
    /// A raw byte stream.
    Stream,
    /// A filesystem path, opened when the body is written.
    Path,
    /// A character stream, transcoded to UTF-8 on the fly.
    Chars,
}

/// Declared category of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// String, number or boolean.
    Scalar,
    /// A structured value serialized as JSON.
    Complex,
    FileLike(FileKind),
}

impl ArgKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ArgKind::Scalar => "scalar",
            ArgKind::Complex => "complex",
            ArgKind::FileLike(_) => "file-like",
        }
    }
}

/// Declared type of a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Unit,
    Text,
    Bytes,
    Stream,
    Json,
}

/// How one argument position is bound into the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub position: usize,
    pub role: ParamRole,
    /// Explicit wire name.
    pub name: Option<String>,
    /// Declared identifier, used when no explicit name is given.
    pub ident: Option<String>,
    pub kind: ArgKind,
}

impl ParameterBinding {
    pub fn new(position: usize, role: ParamRole, kind: ArgKind) -> Self {
        Self {
            position,
            role,
            name: None,
            ident: None,
            kind,
        }
    }

    pub fn path(position: usize, name: &str) -> Self {
        Self::new(position, ParamRole::Path, ArgKind::Scalar).named(name)
    }

    pub fn query(position: usize, name: &str) -> Self {
        Self::new(position, ParamRole::Query, ArgKind::Scalar).named(name)
    }

    /// JSON body; `kind` says whether the value is a scalar, a structure or a stream.
    pub fn json_body(position: usize, kind: ArgKind) -> Self {
        Self::new(position, ParamRole::JsonBody, kind)
    }

    pub fn xml_body(position: usize, kind: ArgKind) -> Self {
        Self::new(position, ParamRole::XmlBody, kind)
    }

    /// Form field without an explicit name; pair with `named` or `ident`.
    pub fn form_field(position: usize, kind: ArgKind) -> Self {
        Self::new(position, ParamRole::FormField, kind)
    }

    pub fn form_file(position: usize, file: FileKind) -> Self {
        Self::new(position, ParamRole::FormFile, ArgKind::FileLike(file))
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn ident(mut self, ident: &str) -> Self {
        self.ident = Some(ident.to_string());
        self
    }

    /// Explicit name, falling back to the declared identifier.
    pub fn resolve_name(&self) -> Result<&str, BindingError> {
        self.name
            .as_deref()
            .or(self.ident.as_deref())
            .ok_or(BindingError::MissingName {
                position: self.position,
            })
    }

    fn is_body(&self) -> bool {
        matches!(self.role, ParamRole::JsonBody | ParamRole::XmlBody)
    }

    fn is_form(&self) -> bool {
        matches!(self.role, ParamRole::FormField | ParamRole::FormFile)
    }
}

/// Immutable metadata for one API operation.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    name: String,
    method: HttpMethod,
    body_mode: BodyMode,
    url_template: String,
    parameters: Vec<ParameterBinding>,
    return_type: ReturnType,
}

impl RequestDescriptor {
    pub fn builder(method: HttpMethod, url_template: &str) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            name: None,
            method,
            body_mode: BodyMode::None,
            url_template: url_template.to_string(),
            parameters: Vec::new(),
            return_type: ReturnType::Json,
        }
    }

    /// Operation label used in logs; defaults to the URL template.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn body_mode(&self) -> BodyMode {
        self.body_mode
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    pub fn parameters(&self) -> &[ParameterBinding] {
        &self.parameters
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// Number of arguments a call must supply.
    pub fn arity(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| p.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// First binding eligible as the body for the descriptor's mode.
    pub(crate) fn body_parameter(&self) -> Option<&ParameterBinding> {
        let role = match self.body_mode {
            BodyMode::Json => ParamRole::JsonBody,
            BodyMode::Xml => ParamRole::XmlBody,
            BodyMode::None | BodyMode::Form => return None,
        };
        self.parameters.iter().find(|p| p.role == role)
    }

    pub(crate) fn form_parameters(&self) -> impl Iterator<Item = &ParameterBinding> {
        self.parameters.iter().filter(|p| p.is_form())
    }
}

/// Builder for `RequestDescriptor`.
#[derive(Debug)]
pub struct RequestDescriptorBuilder {
    name: Option<String>,
    method: HttpMethod,
    body_mode: BodyMode,
    url_template: String,
    parameters: Vec<ParameterBinding>,
    return_type: ReturnType,
}

impl RequestDescriptorBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn body_mode(mut self, mode: BodyMode) -> Self {
        self.body_mode = mode;
        self
    }

    pub fn param(mut self, binding: ParameterBinding) -> Self {
        self.parameters.push(binding);
        self
    }

    pub fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Validate the binding table and freeze the descriptor.
    pub fn build(self) -> Result<RequestDescriptor, BindingError> {
        let mut positions = HashSet::new();
        for p in &self.parameters {
            if !positions.insert(p.position) {
                return Err(BindingError::InvalidDescriptor(format!(
                    "position {} is bound twice",
                    p.position
                )));
            }
        }

        let bodies = self.parameters.iter().filter(|p| p.is_body()).count();
        if bodies > 1 {
            return Err(BindingError::InvalidDescriptor(
                "more than one body parameter".to_string(),
            ));
        }
        let forms = self.parameters.iter().any(|p| p.is_form());
        match self.body_mode {
            BodyMode::Form if bodies > 0 => {
                return Err(BindingError::InvalidDescriptor(
                    "form descriptors cannot carry a JSON or XML body".to_string(),
                ));
            }
            BodyMode::Json | BodyMode::Xml if forms => {
                return Err(BindingError::InvalidDescriptor(
                    "form fields require form body mode".to_string(),
                ));
            }
            BodyMode::None if bodies > 0 || forms => {
                return Err(BindingError::InvalidDescriptor(
                    "body parameters require a body mode".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(p) = self
            .parameters
            .iter()
            .find(|p| p.role == ParamRole::FormFile && !matches!(p.kind, ArgKind::FileLike(_)))
        {
            return Err(BindingError::InvalidDescriptor(format!(
                "form file at position {} must be file-like",
                p.position
            )));
        }
        // URL values are rendered as text; anything else has to travel in a body or form.
        if let Some(p) = self.parameters.iter().find(|p| {
            matches!(p.role, ParamRole::Path | ParamRole::Query) && p.kind != ArgKind::Scalar
        }) {
            return Err(BindingError::InvalidDescriptor(format!(
                "{:?} parameter at position {} must be scalar, not {}",
                p.role,
                p.position,
                p.kind.label()
            )));
        }

        Ok(RequestDescriptor {
            name: self.name.unwrap_or_else(|| self.url_template.clone()),
            method: self.method,
            body_mode: self.body_mode,
            url_template: self.url_template,
            parameters: self.parameters,
            return_type: self.return_type,
        })
    }
}
