//! Form bodies and streamable resources.
//!
//! # Design
//! Every file-like argument is normalized into a `Resource` before it enters
//! a `FormBody`. A resource is consumed at most once: through `LazyReader`
//! paths are opened only when the transport first pulls bytes, and character
//! streams are transcoded to UTF-8 a few bytes at a time. Multipart framing
//! is left to the transport, which streams each part from its reader.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

enum Source {
    Reader(Box<dyn Read + Send>),
    Path(PathBuf),
}

/// A single-use streamable payload.
pub struct Resource {
    filename: Option<String>,
    content_length: Option<u64>,
    source: Source,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Reader(_) => "reader".to_string(),
            Source::Path(p) => p.display().to_string(),
        };
        f.debug_struct("Resource")
            .field("filename", &self.filename)
            .field("content_length", &self.content_length)
            .field("source", &source)
            .finish()
    }
}

impl Resource {
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self {
            filename: None,
            content_length: None,
            source: Source::Reader(reader),
        }
    }

    /// A file on disk; the filename defaults to the path's last component.
    pub fn from_path(path: PathBuf) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let content_length = std::fs::metadata(&path).ok().map(|m| m.len());
        Self {
            filename,
            content_length,
            source: Source::Path(path),
        }
    }

    pub fn from_chars(chars: Box<dyn Iterator<Item = char> + Send>) -> Self {
        Self::from_reader(Box::new(Utf8Reader::new(chars)))
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Open the underlying source for reading.
    pub fn open(self) -> io::Result<Box<dyn Read + Send>> {
        match self.source {
            Source::Reader(reader) => Ok(reader),
            Source::Path(path) => Ok(Box::new(File::open(path)?)),
        }
    }

    /// Defer `open` until the first read.
    pub fn into_lazy_reader(self) -> LazyReader {
        LazyReader {
            state: LazyState::Pending(self),
        }
    }
}

/// Lazily encodes a character stream as UTF-8 bytes.
pub struct Utf8Reader<I> {
    chars: I,
    pending: [u8; 4],
    start: usize,
    end: usize,
}

impl<I: Iterator<Item = char>> Utf8Reader<I> {
    pub fn new(chars: I) -> Self {
        Self {
            chars,
            pending: [0; 4],
            start: 0,
            end: 0,
        }
    }
}

impl<I: Iterator<Item = char>> Read for Utf8Reader<I> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.start == self.end {
                match self.chars.next() {
                    Some(c) => {
                        self.start = 0;
                        self.end = c.encode_utf8(&mut self.pending).len();
                    }
                    None => break,
                }
            }
            let n = (self.end - self.start).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.pending[self.start..self.start + n]);
            self.start += n;
            written += n;
        }
        Ok(written)
    }
}

/// One value of a form field.
#[derive(Debug)]
pub enum FormValue {
    Text(String),
    /// A structured value already rendered as JSON.
    Json(String),
    File(Resource),
}

impl FormValue {
    pub fn is_text(&self) -> bool {
        matches!(self, FormValue::Text(_))
    }
}

/// Ordered, multi-valued form field map.
///
/// Names keep the order of their first insertion; repeated names collect
/// their values in insertion order.
#[derive(Debug, Default)]
pub struct FormBody {
    fields: Vec<(String, Vec<FormValue>)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: FormValue) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.fields.push((name.to_string(), vec![value])),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn get_all(&self, name: &str) -> &[FormValue] {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when no value needs a multipart encoding.
    pub fn is_plain(&self) -> bool {
        self.fields
            .iter()
            .all(|(_, values)| values.iter().all(FormValue::is_text))
    }

    /// `application/x-www-form-urlencoded` rendering. Non-text values are skipped.
    pub fn to_urlencoded(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, values) in &self.fields {
            for value in values {
                if let FormValue::Text(text) = value {
                    serializer.append_pair(name, text);
                }
            }
        }
        serializer.finish()
    }

    /// Consume the form as `(name, value)` pairs, in field order.
    pub fn into_parts(self) -> impl Iterator<Item = (String, FormValue)> {
        self.fields.into_iter().flat_map(|(name, values)| {
            values.into_iter().map(move |value| (name.clone(), value))
        })
    }
}

enum LazyState {
    Pending(Resource),
    Open(Box<dyn Read + Send>),
    Failed,
}

/// A resource that is opened on its first read.
pub struct LazyReader {
    state: LazyState,
}

impl Read for LazyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if matches!(self.state, LazyState::Pending(_)) {
            let pending = std::mem::replace(&mut self.state, LazyState::Failed);
            if let LazyState::Pending(resource) = pending {
                self.state = LazyState::Open(resource.open()?);
            }
        }
        match &mut self.state {
            LazyState::Open(reader) => reader.read(buf),
            _ => Err(io::Error::other("resource could not be opened")),
        }
    }
}
