use crate::constants;
use memchr::memmem::Finder;

/// Locates the two delimiter forms of one boundary: `--boundary`, which opens
/// the body, and `\r\n--boundary`, which closes a part's content. Also finds
/// the blank line ending a part's headers.
#[derive(Debug, Clone)]
pub(crate) struct BoundaryMatcher {
    first: Finder<'static>,
    center: Finder<'static>,
    header_end: Finder<'static>,
}

impl BoundaryMatcher {
    pub fn new(boundary: &str) -> Self {
        let first = format!("{}{}", constants::BOUNDARY_EXT, boundary);
        let center = format!("{}{}{}", constants::CRLF, constants::BOUNDARY_EXT, boundary);

        BoundaryMatcher {
            first: Finder::new(first.as_bytes()).into_owned(),
            center: Finder::new(center.as_bytes()).into_owned(),
            header_end: Finder::new(constants::CRLF_CRLF.as_bytes()).into_owned(),
        }
    }

    pub fn first(&self) -> &Finder<'static> {
        &self.first
    }

    pub fn center(&self) -> &Finder<'static> {
        &self.center
    }

    pub fn header_end(&self) -> &Finder<'static> {
        &self.header_end
    }

    pub fn first_len(&self) -> usize {
        self.first.needle().len()
    }

    pub fn center_len(&self) -> usize {
        self.center.needle().len()
    }

    /// Bytes that must stay buffered after a failed search, since they may be
    /// the start of a delimiter completed by the next chunk.
    pub fn retain_len(&self) -> usize {
        self.center_len() + constants::DELIMITER_OVERLAP
    }
}

/// Checks a boundary against RFC 2046: 1 to 70 characters, no line breaks.
pub(crate) fn validate(boundary: &str) -> crate::Result<()> {
    if boundary.is_empty()
        || boundary.len() > constants::MAX_BOUNDARY_LEN
        || boundary.bytes().any(|b| b == b'\r' || b == b'\n')
    {
        return Err(crate::Error::MissingBoundary);
    }

    Ok(())
}
