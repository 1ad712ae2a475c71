use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ReqResult;
use crate::error::{AttachmentError, Error};

const FILE_PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Encoding applied to the outbound payload of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BodyFormat {
    Raw,
    #[default]
    Json,
    Form,
    Multipart,
}

impl BodyFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Json => "json",
            Self::Form => "form",
            Self::Multipart => "multipart",
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Outbound payload of a single verb call.
///
/// `Data` is structured and encoded according to the active [`BodyFormat`];
/// `Text` is a pre-encoded body sent as written.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Data(Value),
    Text(String),
}

impl Payload {
    pub fn empty() -> Self {
        Self::Data(Value::Object(Map::new()))
    }

    pub fn from_serialize<T>(payload: &T) -> ReqResult<Self>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(payload)
            .map(Self::Data)
            .map_err(|source| Error::SerializeJson { source })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Data(Value::Null) => true,
            Self::Data(Value::Object(map)) => map.is_empty(),
            Self::Data(Value::Array(items)) => items.is_empty(),
            Self::Data(_) => false,
            Self::Text(text) => text.is_empty(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self::Data(Value::Object(map))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Where the content of a multipart file part comes from.
pub enum AttachmentSource {
    Bytes(Bytes),
    Path(PathBuf),
    Reader(Box<dyn Read + Send>),
}

impl AttachmentSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::Reader(Box::new(reader))
    }

    fn read_all(&mut self, field: &str) -> Result<Bytes, AttachmentError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Path(path) => std::fs::read(&*path)
                .map(Bytes::from)
                .map_err(|source| AttachmentError::ReadFile {
                    field: field.to_owned(),
                    path: path.clone(),
                    source,
                }),
            Self::Reader(reader) => {
                let mut collected = Vec::new();
                reader
                    .read_to_end(&mut collected)
                    .map_err(|source| AttachmentError::ReadStream {
                        field: field.to_owned(),
                        source,
                    })?;
                let collected = Bytes::from(collected);
                *self = Self::Bytes(collected.clone());
                Ok(collected)
            }
        }
    }
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => formatter
                .debug_tuple("Bytes")
                .field(&bytes.len())
                .finish(),
            Self::Path(path) => formatter.debug_tuple("Path").field(path).finish(),
            Self::Reader(_) => formatter.write_str("Reader(..)"),
        }
    }
}

impl From<Bytes> for AttachmentSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for AttachmentSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for AttachmentSource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for AttachmentSource {
    fn from(contents: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(contents.as_bytes()))
    }
}

impl From<String> for AttachmentSource {
    fn from(contents: String) -> Self {
        Self::Bytes(Bytes::from(contents))
    }
}

impl From<&Path> for AttachmentSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for AttachmentSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// A file part of a multipart body.
#[derive(Debug)]
pub struct Attachment {
    name: String,
    contents: AttachmentSource,
    filename: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, contents: impl Into<AttachmentSource>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            filename: None,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolved_filename(&self) -> String {
        if let Some(filename) = &self.filename {
            return filename.clone();
        }
        if let AttachmentSource::Path(path) = &self.contents
            && let Some(file_name) = path.file_name()
        {
            return file_name.to_string_lossy().into_owned();
        }
        self.name.clone()
    }
}

impl<N, C> From<(N, C)> for Attachment
where
    N: Into<String>,
    C: Into<AttachmentSource>,
{
    fn from((name, contents): (N, C)) -> Self {
        Self::new(name, contents)
    }
}

impl<N, C, F> From<(N, C, F)> for Attachment
where
    N: Into<String>,
    C: Into<AttachmentSource>,
    F: Into<String>,
{
    fn from((name, contents, filename): (N, C, F)) -> Self {
        Self::new(name, contents).filename(filename)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Encodes `payload` for `format`.
///
/// Attachments are only read in multipart mode; each source is read in full
/// and released before this returns.
pub fn encode_body(
    format: BodyFormat,
    payload: Payload,
    files: &mut [Attachment],
) -> Result<EncodedBody, AttachmentError> {
    match format {
        BodyFormat::Raw => Ok(EncodedBody {
            bytes: match payload {
                Payload::Text(text) => Bytes::from(text),
                Payload::Data(Value::String(text)) => Bytes::from(text),
                Payload::Data(value) => Bytes::from(value.to_string()),
            },
            content_type: None,
        }),
        BodyFormat::Json => Ok(EncodedBody {
            bytes: match payload {
                Payload::Text(text) => Bytes::from(text),
                Payload::Data(value) => Bytes::from(value.to_string()),
            },
            content_type: Some("application/json".to_owned()),
        }),
        BodyFormat::Form => Ok(EncodedBody {
            bytes: match payload {
                Payload::Text(text) => Bytes::from(text),
                Payload::Data(value) => Bytes::from(encode_form(&value)),
            },
            content_type: Some("application/x-www-form-urlencoded".to_owned()),
        }),
        BodyFormat::Multipart => encode_multipart(payload, files),
    }
}

fn encode_form(value: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    match value {
        Value::Object(map) => {
            for (name, value) in map {
                append_form_value(&mut serializer, name.clone(), value);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                append_form_value(&mut serializer, index.to_string(), value);
            }
        }
        Value::Null => {}
        scalar => return scalar_text(scalar),
    }
    serializer.finish()
}

fn append_form_value(
    serializer: &mut url::form_urlencoded::Serializer<'_, String>,
    key: String,
    value: &Value,
) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (name, nested) in map {
                append_form_value(serializer, format!("{key}[{name}]"), nested);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                append_form_value(serializer, format!("{key}[{index}]"), nested);
            }
        }
        scalar => {
            serializer.append_pair(&key, &scalar_text(scalar));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn multipart_fields(payload: Payload) -> Vec<(String, String)> {
    match payload {
        Payload::Data(Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| {
                let text = scalar_text(&value);
                (name, text)
            })
            .collect(),
        Payload::Data(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), scalar_text(value)))
            .collect(),
        Payload::Data(_) => Vec::new(),
        Payload::Text(text) => url::form_urlencoded::parse(text.as_bytes())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect(),
    }
}

fn encode_multipart(
    payload: Payload,
    files: &mut [Attachment],
) -> Result<EncodedBody, AttachmentError> {
    let mut file_parts = Vec::with_capacity(files.len());
    for attachment in files.iter_mut() {
        let contents = attachment.contents.read_all(&attachment.name)?;
        file_parts.push((
            attachment.name.clone(),
            attachment.resolved_filename(),
            contents,
        ));
    }

    let boundary = gen_boundary();
    let mut buffer = Vec::new();
    for (name, value) in multipart_fields(payload) {
        write_part_head(&mut buffer, &boundary, &name, None);
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    for (name, filename, contents) in &file_parts {
        write_part_head(&mut buffer, &boundary, name, Some(filename));
        buffer.extend_from_slice(contents);
        buffer.extend_from_slice(b"\r\n");
    }
    buffer.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Ok(EncodedBody {
        bytes: Bytes::from(buffer),
        content_type: Some(format!("multipart/form-data; boundary={boundary}")),
    })
}

fn write_part_head(buffer: &mut Vec<u8>, boundary: &str, name: &str, filename: Option<&str>) {
    buffer.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    buffer.extend_from_slice(b"Content-Disposition: form-data; name=\"");
    buffer.extend_from_slice(escape_quoted(name).as_bytes());
    buffer.extend_from_slice(b"\"");
    if let Some(filename) = filename {
        buffer.extend_from_slice(b"; filename=\"");
        buffer.extend_from_slice(escape_quoted(filename).as_bytes());
        buffer.extend_from_slice(b"\"\r\nContent-Type: ");
        buffer.extend_from_slice(FILE_PART_CONTENT_TYPE.as_bytes());
    }
    buffer.extend_from_slice(b"\r\n\r\n");
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn gen_boundary() -> String {
    let mut rng = rand::rng();
    let a: u64 = rng.random();
    let b: u64 = rng.random();
    let c: u64 = rng.random();
    let d: u64 = rng.random();

    format!("{a:016x}-{b:016x}-{c:016x}-{d:016x}")
}
