use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem::Finder;

/// Holds the bytes received but not yet consumed by the parser.
///
/// Consuming a prefix only moves the start of the underlying `BytesMut`, so
/// appending a chunk never copies the retained tail again. Searches resume
/// where the previous miss left off instead of rescanning the whole buffer.
#[derive(Debug, Default)]
pub(crate) struct StreamBuffer {
    buf: BytesMut,
    scanned: usize,
    total: u64,
}

impl StreamBuffer {
    pub fn new() -> Self {
        StreamBuffer::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        self.buf.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes pushed over the whole lifetime of this buffer.
    pub fn total_received(&self) -> u64 {
        self.total
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.buf.starts_with(prefix)
    }

    /// Returns the offset of the first occurrence of the finder's needle.
    ///
    /// After a miss, the next search skips every position that was already
    /// ruled out, keeping only the last `needle.len() - 1` bytes in play.
    pub fn find(&mut self, finder: &Finder<'_>) -> Option<usize> {
        let start = self.scanned.min(self.buf.len());

        match finder.find(&self.buf[start..]) {
            Some(idx) => Some(start + idx),
            None => {
                let needle_len = finder.needle().len();
                self.scanned = self.buf.len().saturating_sub(needle_len.saturating_sub(1));
                None
            }
        }
    }

    /// Removes and returns the first `size` bytes.
    pub fn read_exact(&mut self, size: usize) -> Bytes {
        self.scanned = 0;
        self.buf.split_to(size).freeze()
    }

    /// Drops the first `size` bytes.
    pub fn discard(&mut self, size: usize) {
        self.scanned = 0;
        self.buf.advance(size);
    }

    /// Removes and returns everything except the last `keep` bytes.
    pub fn read_all_but(&mut self, keep: usize) -> Bytes {
        let size = self.buf.len().saturating_sub(keep);
        self.read_exact(size)
    }

    /// Drops everything except the last `keep` bytes.
    pub fn retain_tail(&mut self, keep: usize) {
        let size = self.buf.len().saturating_sub(keep);
        self.discard(size);
    }

    pub fn read_full_buf(&mut self) -> Bytes {
        self.read_exact(self.buf.len())
    }
}
