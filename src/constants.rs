pub(crate) const DEFAULT_REQUEST_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_FILE_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_FIELD_SIZE_LIMIT: usize = 1024 * 1024;
pub(crate) const DEFAULT_PART_HEADER_SIZE_LIMIT: usize = 8 * 1024;

pub(crate) const MAX_HEADERS: usize = 32;
pub(crate) const MAX_BOUNDARY_LEN: usize = 70;
pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";

/// Bytes kept beyond the delimiter length whenever a search misses, so a
/// delimiter or header terminator split across chunks is still found.
pub(crate) const DELIMITER_OVERLAP: usize = 4;

/// Random bytes in a temporary file name, hex encoded.
pub(crate) const TMP_FILE_TOKEN_LEN: usize = 32;
