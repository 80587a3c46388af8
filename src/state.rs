use crate::part_headers::PartDescriptor;
use crate::sink::{FieldSink, FileSink};

/// Where the parser stands in the body, with the data only that position
/// needs.
#[derive(Debug)]
pub(crate) enum ParseState {
    /// Skipping the preamble until `--boundary` shows up.
    AwaitingFirstBoundary,
    /// A delimiter was consumed; `\r\n` opens another part, `--` ends the body.
    AwaitingBoundary,
    ReadingHeader,
    ReadingFieldBody {
        part: PartDescriptor,
        sink: FieldSink,
    },
    ReadingFileBody {
        part: PartDescriptor,
        sink: Option<FileSink>,
    },
    /// The closing delimiter was seen; the epilogue is ignored.
    Terminated,
    /// A failure was reported and everything was cleaned up.
    Failed,
}

impl ParseState {
    pub fn name(&self) -> &'static str {
        match self {
            ParseState::AwaitingFirstBoundary => "awaiting first boundary",
            ParseState::AwaitingBoundary => "awaiting boundary",
            ParseState::ReadingHeader => "reading header",
            ParseState::ReadingFieldBody { .. } => "reading field body",
            ParseState::ReadingFileBody { .. } => "reading file body",
            ParseState::Terminated => "terminated",
            ParseState::Failed => "failed",
        }
    }
}
