//! Form payloads: `multipart/form-data` and `application/x-www-form-urlencoded`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Approximate per-field framing cost of a multipart boundary line.
pub(crate) const FORM_BOUNDARY_SIZE: u64 = 40;

static BOUNDARY_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A single form field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File {
        filename: Option<String>,
        content_type: Option<String>,
        data: Bytes,
    },
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(text) => Some(text),
            FormValue::File { .. } => None,
        }
    }

    fn len(&self) -> u64 {
        match self {
            FormValue::Text(text) => text.len() as u64,
            FormValue::File { data, .. } => data.len() as u64,
        }
    }
}

/// Ordered list of form fields. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, FormValue::Text(value.into()));
        self
    }

    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.append(
            name,
            FormValue::File {
                filename: Some(filename.into()),
                content_type: Some(content_type.into()),
                data: data.into(),
            },
        );
        self
    }

    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.fields.push((name.into(), value));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FormValue> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Upfront size estimate used for upload progress.
    ///
    /// Each field costs a fixed boundary allowance, its `Content-Disposition`
    /// line and its value. Filenames and part content types are not counted.
    pub fn estimated_size(&self) -> u64 {
        self.fields
            .iter()
            .map(|(key, value)| {
                let disposition = format!("Content-Disposition: form-data; name=\"{key}\"");
                FORM_BOUNDARY_SIZE + disposition.len() as u64 + value.len()
            })
            .sum()
    }

    /// Encode as a multipart body delimited by `boundary`.
    pub fn encode(&self, boundary: &str) -> Bytes {
        let mut out = BytesMut::new();
        for (key, value) in &self.fields {
            out.put_slice(b"--");
            out.put_slice(boundary.as_bytes());
            out.put_slice(b"\r\n");
            match value {
                FormValue::Text(text) => {
                    out.put_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape(key))
                            .as_bytes(),
                    );
                    out.put_slice(text.as_bytes());
                }
                FormValue::File {
                    filename,
                    content_type,
                    data,
                } => {
                    let filename = filename.as_deref().unwrap_or("blob");
                    out.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape(key),
                            escape(filename)
                        )
                        .as_bytes(),
                    );
                    let content_type =
                        content_type.as_deref().unwrap_or("application/octet-stream");
                    out.put_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                    out.put_slice(data);
                }
            }
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"--\r\n");
        out.freeze()
    }

    /// Parse a multipart body delimited by `boundary`.
    pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<Self> {
        let delimiter = format!("--{boundary}");
        let delimiter = delimiter.as_bytes();
        let mut form = FormData::new();

        let mut rest = match find(body, delimiter) {
            Some(start) => &body[start + delimiter.len()..],
            None => return Err(malformed("missing opening boundary")),
        };

        loop {
            if rest.starts_with(b"--") {
                return Ok(form);
            }
            rest = rest
                .strip_prefix(b"\r\n")
                .ok_or_else(|| malformed("boundary not followed by CRLF"))?;

            let end = find(rest, delimiter).ok_or_else(|| malformed("missing closing boundary"))?;
            let part = &rest[..end];
            let part = part.strip_suffix(b"\r\n").unwrap_or(part);
            form.fields.push(parse_part(part)?);
            rest = &rest[end + delimiter.len()..];
        }
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    pub fn parse_urlencoded(body: &[u8]) -> Self {
        let fields = url::form_urlencoded::parse(body)
            .map(|(key, value)| (key.into_owned(), FormValue::Text(value.into_owned())))
            .collect();
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields = iter
            .into_iter()
            .map(|(key, value)| (key.into(), FormValue::Text(value.into())))
            .collect();
        Self { fields }
    }
}

/// Generate a boundary unlikely to appear in field data.
pub fn generate_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let counter = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("----pulith-http-{nanos:x}{counter:08x}")
}

fn parse_part(part: &[u8]) -> Result<(String, FormValue)> {
    let split = find(part, b"\r\n\r\n").ok_or_else(|| malformed("part without header block"))?;
    let head = std::str::from_utf8(&part[..split]).map_err(|e| Error::Decode(Box::new(e)))?;
    let data = &part[split + 4..];

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if header.eq_ignore_ascii_case("content-disposition") {
            name = disposition_param(value, "name");
            filename = disposition_param(value, "filename");
        } else if header.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    let name = name.ok_or_else(|| malformed("part without a name"))?;
    let value = if filename.is_some() || content_type.is_some() {
        FormValue::File {
            filename,
            content_type,
            data: Bytes::copy_from_slice(data),
        }
    } else {
        let text = String::from_utf8(data.to_vec()).map_err(|e| Error::Decode(Box::new(e)))?;
        FormValue::Text(text)
    };
    Ok((name, value))
}

fn disposition_param(value: &str, param: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|segment| {
        let (key, raw) = segment.trim().split_once('=')?;
        if !key.eq_ignore_ascii_case(param) {
            return None;
        }
        let raw = raw.trim();
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(raw);
        Some(unquoted.replace("%22", "\"").replace("%0D", "\r").replace("%0A", "\n"))
    })
}

fn escape(value: &str) -> String {
    value.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn malformed(reason: &str) -> Error {
    Error::Decode(format!("malformed multipart body: {reason}").into())
}
