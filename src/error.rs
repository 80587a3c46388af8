use std::fmt::{self, Debug, Display, Formatter};

/// A set of errors that can occur while parsing a multipart stream.
///
/// Every error is fatal to the parse as a whole. By the time a caller observes
/// one, all temporary files created during that parse have been removed.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The `Content-Type` header is missing or is not `multipart/form-data`.
    #[error("Content-Type is not multipart/form-data")]
    MissingOrInvalidContentType,

    /// No usable boundary found in the `Content-Type` header.
    #[error("multipart boundary not found in Content-Type")]
    MissingBoundary,

    /// The request body exceeded the maximum size limit.
    #[error("request size exceeded the maximum limit: {limit} bytes")]
    RequestTooLarge { limit: u64 },

    /// A part's headers exceeded the maximum size limit.
    #[error("part headers exceeded the maximum size limit: {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// A part's `Content-Disposition` header is missing or not `form-data`.
    #[error("part Content-Disposition is missing or not form-data")]
    InvalidDisposition,

    /// A part's `Content-Disposition` header carries no `name` attribute.
    #[error("part Content-Disposition has no name")]
    MissingPartName,

    /// A text field exceeded the maximum size limit.
    #[error("field '{field_name}' exceeded the maximum size limit: {limit} bytes")]
    FieldTooLarge { limit: usize, field_name: String },

    /// A file part exceeded the maximum size limit.
    #[error("file '{field_name}' exceeded the maximum size limit: {limit} bytes")]
    FileTooLarge { limit: u64, field_name: String },

    /// The body holds more parts than allowed.
    #[error("number of parts exceeded the maximum limit: {limit}")]
    TooManyParts { limit: usize },

    /// The body holds more file parts than allowed.
    #[error("number of files exceeded the maximum limit: {limit}")]
    TooManyFiles { limit: usize },

    /// No chunk arrived within the chunk timeout.
    #[error("timed out waiting for the next chunk")]
    ChunkTimeout,

    /// The whole parse took longer than the request timeout.
    #[error("timed out reading the request body")]
    RequestTimeout,

    /// The stream ended or failed before the closing boundary was seen.
    #[error("stream closed before the closing boundary")]
    PrematureClose,

    /// The stream violates the multipart structure.
    #[error("malformed multipart stream: {0}")]
    MalformedMultipart(&'static str),

    /// A temporary file could not be created, written, moved or removed.
    #[error("temporary file operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode a field as `JSON` in [`Form::json`](crate::Form::json).
    #[cfg(feature = "json")]
    #[error("failed to decode field data as JSON: {0}")]
    DecodeJson(#[source] serde_json::Error),
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_the_limit() {
        let err = Error::FileTooLarge {
            limit: 10,
            field_name: "avatar".to_owned(),
        };
        assert_eq!(err.to_string(), "file 'avatar' exceeded the maximum size limit: 10 bytes");
        assert_eq!(format!("{:?}", err), err.to_string());
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(err.source().is_some());
        assert!(Error::PrematureClose.source().is_none());
    }
}
