//! Runtime argument values.
//!
//! Arguments form a closed set: nothing, a scalar, a structured value that
//! serializes to JSON, or a file-like source. File-like sources are owned, so
//! dropping an `Arg` closes whatever it wraps.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::descriptor::ArgKind;
use crate::form::Resource;

/// Simple value rendered with its `Display` form.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => f.write_str(s),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::UInt(n) => write!(f, "{n}"),
            Scalar::Float(n) => write!(f, "{n}"),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A structured argument that can be rendered as JSON.
///
/// Blanket-implemented for every `Serialize` type, so callers pass their own
/// request DTOs through `Arg::complex`.
pub trait ComplexValue: fmt::Debug + Send + Sync {
    fn to_json_string(&self) -> serde_json::Result<String>;
    fn to_json_value(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T> ComplexValue for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn to_json_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// File-like argument, normalized into a `Resource` when a form is built.
pub enum FileArg {
    Resource(Resource),
    Stream(Box<dyn Read + Send>),
    Path(PathBuf),
    Chars(Box<dyn Iterator<Item = char> + Send>),
}

impl fmt::Debug for FileArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileArg::Resource(r) => f.debug_tuple("Resource").field(r).finish(),
            FileArg::Stream(_) => f.write_str("Stream(..)"),
            FileArg::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FileArg::Chars(_) => f.write_str("Chars(..)"),
        }
    }
}

impl FileArg {
    pub fn into_resource(self) -> Resource {
        match self {
            FileArg::Resource(r) => r,
            FileArg::Stream(reader) => Resource::from_reader(reader),
            FileArg::Path(path) => Resource::from_path(path),
            FileArg::Chars(chars) => Resource::from_chars(chars),
        }
    }
}

/// One runtime argument.
#[derive(Debug)]
pub enum Arg {
    Null,
    Scalar(Scalar),
    Complex(Arc<dyn ComplexValue>),
    File(FileArg),
}

impl Arg {
    pub fn str(value: impl Into<String>) -> Self {
        Arg::Scalar(Scalar::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Arg::Scalar(Scalar::Int(value))
    }

    pub fn uint(value: u64) -> Self {
        Arg::Scalar(Scalar::UInt(value))
    }

    pub fn float(value: f64) -> Self {
        Arg::Scalar(Scalar::Float(value))
    }

    pub fn bool(value: bool) -> Self {
        Arg::Scalar(Scalar::Bool(value))
    }

    pub fn complex<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Arg::Complex(Arc::new(value))
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Arg::File(FileArg::Stream(Box::new(reader)))
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Arg::File(FileArg::Path(path.into()))
    }

    pub fn resource(resource: Resource) -> Self {
        Arg::File(FileArg::Resource(resource))
    }

    pub fn chars(chars: impl Iterator<Item = char> + Send + 'static) -> Self {
        Arg::File(FileArg::Chars(Box::new(chars)))
    }

    /// Whether this value may be bound to a parameter declared as `kind`.
    pub fn matches(&self, kind: ArgKind) -> bool {
        match (self, kind) {
            (Arg::Null, _) => true,
            (Arg::Scalar(_), ArgKind::Scalar) => true,
            (Arg::Complex(_), ArgKind::Complex) => true,
            (Arg::File(_), ArgKind::FileLike(_)) => true,
            _ => false,
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::str(value)
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::int(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::bool(value)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Null, Into::into)
    }
}
