use crate::constants;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Represents the resource limits of one parse, to keep slow, partial or
/// oversized uploads from exhausting memory, disk or connection slots.
///
/// A `Limits` value is handed to [`Multipart`](crate::Multipart) by value and
/// stays fixed for the lifetime of that parse.
///
/// # Examples
///
/// ```
/// use multer_spool::Limits;
/// use std::time::Duration;
///
/// let limits = Limits::new()
///     .tmp_dir("/var/tmp/uploads")
///     .max_request_size(64 * 1024 * 1024)
///     .max_file_size(32 * 1024 * 1024)
///     .max_field_size(64 * 1024)
///     .max_files(4)
///     .chunk_timeout(Duration::from_secs(10))
///     .request_timeout(Duration::from_secs(120));
///
/// assert_eq!(limits.get_max_files(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Limits {
    pub(crate) tmp_dir: PathBuf,
    pub(crate) max_request_size: u64,
    pub(crate) max_file_size: u64,
    pub(crate) max_field_size: usize,
    pub(crate) max_part_header_size: usize,
    pub(crate) max_parts: usize,
    pub(crate) max_files: usize,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) chunk_timeout: Option<Duration>,
}

impl Limits {
    /// Creates the default limits: temporary files under
    /// [`std::env::temp_dir`], 1 MiB per text field, 8 KiB of headers per
    /// part, everything else unbounded and no timeouts.
    pub fn new() -> Limits {
        Limits::default()
    }

    /// Sets the directory temporary files are created in.
    pub fn tmp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Limits {
        self.tmp_dir = dir.into();
        self
    }

    /// Sets the size limit of the whole request body.
    ///
    /// It is checked against a declared `Content-Length` before parsing starts
    /// and against the bytes actually streamed.
    pub fn max_request_size(mut self, limit: u64) -> Limits {
        self.max_request_size = limit;
        self
    }

    /// Sets the size limit of each file part.
    ///
    /// The limit is inclusive: a file of exactly `limit` bytes is accepted, one
    /// more byte fails the parse with [`FileTooLarge`](crate::Error::FileTooLarge).
    pub fn max_file_size(mut self, limit: u64) -> Limits {
        self.max_file_size = limit;
        self
    }

    /// Sets the size limit of each text field, which is held in memory.
    ///
    /// Like [`max_file_size`](Limits::max_file_size), the limit is inclusive.
    pub fn max_field_size(mut self, limit: usize) -> Limits {
        self.max_field_size = limit;
        self
    }

    /// Sets the size limit of the header block of each part.
    pub fn max_part_header_size(mut self, limit: usize) -> Limits {
        self.max_part_header_size = limit;
        self
    }

    /// Sets the maximum number of parts, fields and files together.
    pub fn max_parts(mut self, limit: usize) -> Limits {
        self.max_parts = limit;
        self
    }

    /// Sets the maximum number of file parts.
    pub fn max_files(mut self, limit: usize) -> Limits {
        self.max_files = limit;
        self
    }

    /// Sets the wall-clock limit of the whole parse, counted from the
    /// construction of the [`Multipart`](crate::Multipart).
    pub fn request_timeout(mut self, timeout: Duration) -> Limits {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the longest idle time allowed between two chunks.
    pub fn chunk_timeout(mut self, timeout: Duration) -> Limits {
        self.chunk_timeout = Some(timeout);
        self
    }

    /// Returns the directory temporary files are created in.
    pub fn get_tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Returns the size limit of the whole request body.
    pub fn get_max_request_size(&self) -> u64 {
        self.max_request_size
    }

    /// Returns the size limit of each file part.
    pub fn get_max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Returns the size limit of each text field.
    pub fn get_max_field_size(&self) -> usize {
        self.max_field_size
    }

    /// Returns the size limit of the header block of each part.
    pub fn get_max_part_header_size(&self) -> usize {
        self.max_part_header_size
    }

    /// Returns the maximum number of parts.
    pub fn get_max_parts(&self) -> usize {
        self.max_parts
    }

    /// Returns the maximum number of file parts.
    pub fn get_max_files(&self) -> usize {
        self.max_files
    }

    /// Returns the request timeout, `None` when disabled.
    pub fn get_request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Returns the chunk timeout, `None` when disabled.
    pub fn get_chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            tmp_dir: std::env::temp_dir(),
            max_request_size: constants::DEFAULT_REQUEST_SIZE_LIMIT,
            max_file_size: constants::DEFAULT_FILE_SIZE_LIMIT,
            max_field_size: constants::DEFAULT_FIELD_SIZE_LIMIT,
            max_part_header_size: constants::DEFAULT_PART_HEADER_SIZE_LIMIT,
            max_parts: usize::MAX,
            max_files: usize::MAX,
            request_timeout: None,
            chunk_timeout: None,
        }
    }
}
