use crate::constants;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// What the headers of one part declare about it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartDescriptor {
    pub(crate) name: String,
    pub(crate) file_name: Option<String>,
    pub(crate) content_type: Option<mime::Mime>,
}

impl PartDescriptor {
    /// Parses a raw header block, terminator included.
    pub fn parse(header_bytes: &[u8]) -> crate::Result<PartDescriptor> {
        let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

        let headers = match httparse::parse_headers(header_bytes, &mut headers) {
            Ok(httparse::Status::Complete((_, raw_headers))) => convert_raw_headers_to_header_map(raw_headers)?,
            Ok(httparse::Status::Partial) => return Err(crate::Error::MalformedMultipart("incomplete part headers")),
            Err(_) => return Err(crate::Error::MalformedMultipart("invalid part headers")),
        };

        let disposition = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|val| std::str::from_utf8(val.as_bytes()).ok())
            .ok_or(crate::Error::InvalidDisposition)?;

        let (name, file_name) = parse_content_disposition(disposition)?;

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| match val.parse::<mime::Mime>() {
                Ok(mime) => Some(mime),
                Err(_) => {
                    debug!("ignoring unparsable part content type: {:?}", val);
                    None
                }
            });

        Ok(PartDescriptor {
            name,
            file_name,
            content_type,
        })
    }

    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}

fn convert_raw_headers_to_header_map(raw_headers: &[httparse::Header]) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw_headers.len());

    for raw_header in raw_headers {
        let name = HeaderName::try_from(raw_header.name)
            .map_err(|_| crate::Error::MalformedMultipart("invalid part header name"))?;

        let value = HeaderValue::from_bytes(raw_header.value)
            .map_err(|_| crate::Error::MalformedMultipart("invalid part header value"))?;

        headers.insert(name, value);
    }

    Ok(headers)
}

/// Extracts `(name, filename)` from a `Content-Disposition` value.
///
/// A present `filename`, even an empty one, marks the part as a file.
fn parse_content_disposition(value: &str) -> crate::Result<(String, Option<String>)> {
    let mut params = split_params(value).into_iter();

    let disposition = params.next().unwrap_or_default();
    if !disposition.trim().eq_ignore_ascii_case("form-data") {
        return Err(crate::Error::InvalidDisposition);
    }

    let mut name = None;
    let mut file_name = None;

    for param in params {
        let (key, val) = match param.split_once('=') {
            Some((key, val)) => (key.trim(), unquote(val.trim())),
            None => continue,
        };

        if key.eq_ignore_ascii_case("name") {
            name = Some(val);
        } else if key.eq_ignore_ascii_case("filename") {
            file_name = Some(val);
        }
    }

    let name = name.ok_or(crate::Error::MissingPartName)?;

    Ok((name, file_name))
}

// Splits on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);

    params
}

fn unquote(value: &str) -> String {
    let inner = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner,
        None => return value.to_owned(),
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(ch);
    }

    out
}
