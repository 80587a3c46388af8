//! An async parser for `multipart/form-data` request bodies that spools file
//! uploads straight to disk.
//!
//! The body is consumed as a [`Stream`](futures_util::stream::Stream) of
//! [`Bytes`](bytes::Bytes) chunks whose boundaries are arbitrary. Text fields
//! are collected in memory, file parts are written to uniquely named temporary
//! files under [`Limits::tmp_dir`]. Every parse is bounded by the size, count
//! and timeout settings of a [`Limits`] value, and a failed parse never leaves
//! temporary files behind.
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use futures_util::stream::once;
//! use multer_spool::{Limits, Multipart};
//! use std::convert::Infallible;
//!
//! # async fn run() {
//! let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\r\n--X-BOUNDARY--\r\n";
//! let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//!
//! let multipart = Multipart::new(stream, "X-BOUNDARY", Limits::default()).unwrap();
//! let form = multipart.parse().await.unwrap();
//!
//! assert_eq!(form.text("my_text_field"), Some("abcd"));
//!
//! let upload = form.file("upload").unwrap();
//! assert_eq!(upload.file_name(), "a.txt");
//! assert_eq!(std::fs::read(upload.path()).unwrap(), b"Hello world");
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! # Features
//!
//! * `json`: adds [`Form::json`] to decode a text field as JSON.
//! * `serde`: makes [`Limits`] deserializable from configuration files.
//! * `tokio-io`: adds [`Multipart::with_reader`] for any
//!   [`AsyncRead`](tokio::io::AsyncRead) source.
//! * `log`: emits diagnostics through the [`log`](https://docs.rs/log) facade.

pub use bytes;
pub use error::Error;
pub use form::{FileHandle, Form, FormValue, MoveError};
pub use limits::Limits;
pub use multipart::Multipart;
pub use parser::Parser;

#[macro_use]
mod macros;

mod boundary;
mod buffer;
mod constants;
mod error;
mod form;
mod limits;
mod multipart;
mod parser;
mod part_headers;
mod sink;
mod state;
mod timeout;

/// A Result type often returned from methods that can have `multer-spool`
/// errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// # Examples
///
/// ```
/// let content_type = "multipart/form-data; boundary=ABCDEFG";
///
/// assert_eq!(multer_spool::parse_boundary(content_type), Ok("ABCDEFG".to_owned()));
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(|_| Error::MissingOrInvalidContentType)?;

    if !(m.type_() == mime::MULTIPART_FORM_DATA.type_() && m.subtype() == mime::MULTIPART_FORM_DATA.subtype()) {
        return Err(Error::MissingOrInvalidContentType);
    }

    let boundary = m
        .get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(Error::MissingBoundary)?;

    boundary::validate(&boundary)?;

    Ok(boundary)
}
