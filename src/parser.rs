use crate::boundary::{self, BoundaryMatcher};
use crate::buffer::StreamBuffer;
use crate::constants;
use crate::form::{Form, FormValue};
use crate::part_headers::PartDescriptor;
use crate::sink::{FieldSink, FileSink};
use crate::state::ParseState;
use crate::{Error, Limits};
use std::mem;

/// The incremental `multipart/form-data` state machine.
///
/// Chunks are pushed in with [`feed`](Parser::feed) in arrival order, and the
/// end of input is reported with [`on_stream_end`](Parser::on_stream_end) or
/// [`on_stream_closed_early`](Parser::on_stream_closed_early). Chunk
/// boundaries may fall anywhere, including inside a delimiter or a header
/// line.
///
/// Any error is fatal. Before an error is returned, the temporary file being
/// written and every file already collected are removed.
///
/// Most callers want [`Multipart`](crate::Multipart), which drives a parser
/// from a stream and enforces the timeouts.
///
/// # Examples
///
/// ```
/// use multer_spool::{Limits, Parser};
///
/// # async fn run() {
/// let mut parser = Parser::new("X-BOUNDARY", Limits::default()).unwrap();
///
/// parser.feed(b"--X-BOUNDARY\r\nContent-Disposition: form-data; na").await.unwrap();
/// parser.feed(b"me=\"greeting\"\r\n\r\nhello\r\n--X-BOUN").await.unwrap();
/// parser.feed(b"DARY--\r\n").await.unwrap();
///
/// let form = parser.on_stream_end().await.unwrap();
/// assert_eq!(form.text("greeting"), Some("hello"));
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Debug)]
pub struct Parser {
    buffer: StreamBuffer,
    matcher: BoundaryMatcher,
    limits: Limits,
    state: ParseState,
    form: Form,
    part_count: usize,
    file_count: usize,
}

impl Parser {
    /// Creates a parser for one request body delimited by `boundary`.
    pub fn new<B: AsRef<str>>(boundary: B, limits: Limits) -> crate::Result<Parser> {
        let boundary = boundary.as_ref();
        boundary::validate(boundary)?;

        debug!("new multipart parser, boundary: {:?}, limits: {:?}", boundary, limits);

        Ok(Parser {
            buffer: StreamBuffer::new(),
            matcher: BoundaryMatcher::new(boundary),
            limits,
            state: ParseState::AwaitingFirstBoundary,
            form: Form::new(),
            part_count: 0,
            file_count: 0,
        })
    }

    /// The limits this parser enforces.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Returns `true` once the closing delimiter has been seen.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ParseState::Terminated)
    }

    /// Processes the next chunk of the body.
    pub async fn feed(&mut self, chunk: &[u8]) -> crate::Result<()> {
        if let ParseState::Failed = self.state {
            return Err(Error::MalformedMultipart("parser already failed"));
        }

        self.buffer.push(chunk);

        if self.buffer.total_received() > self.limits.max_request_size {
            let err = Error::RequestTooLarge {
                limit: self.limits.max_request_size,
            };
            return Err(self.fail(err).await);
        }

        match self.advance().await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Reports a clean end of input, yielding the collected form if the
    /// closing delimiter was seen.
    pub async fn on_stream_end(mut self) -> crate::Result<Form> {
        match self.state {
            ParseState::Terminated => {
                debug!(
                    "multipart body complete: {} parts, {} files",
                    self.part_count, self.file_count
                );
                Ok(mem::take(&mut self.form))
            }
            ParseState::Failed => Err(Error::MalformedMultipart("parser already failed")),
            _ => Err(self.fail(Error::PrematureClose).await),
        }
    }

    /// Reports an abrupt disconnection of the input.
    pub async fn on_stream_closed_early(mut self) -> Error {
        self.fail(Error::PrematureClose).await
    }

    /// Aborts the parse with `err`: the temporary file being written and all
    /// collected files are removed before `err` is handed back.
    pub async fn fail(&mut self, err: Error) -> Error {
        debug!("multipart parse failed while {}: {}", self.state.name(), err);

        if let ParseState::ReadingFileBody { sink: Some(sink), .. } = mem::replace(&mut self.state, ParseState::Failed)
        {
            sink.abort().await;
        }

        mem::take(&mut self.form).cleanup().await;
        self.buffer = StreamBuffer::new();

        err
    }

    async fn advance(&mut self) -> crate::Result<()> {
        loop {
            let state = mem::replace(&mut self.state, ParseState::Failed);
            let (next, more) = self.step(state).await?;
            self.state = next;

            if !more || self.buffer.is_empty() {
                return Ok(());
            }
        }
    }

    /// Runs one transition. The flag tells whether the buffer may hold enough
    /// input for another one.
    async fn step(&mut self, state: ParseState) -> crate::Result<(ParseState, bool)> {
        match state {
            ParseState::AwaitingFirstBoundary => Ok(self.read_first_boundary()),
            ParseState::AwaitingBoundary => self.read_boundary_suffix(),
            ParseState::ReadingHeader => self.read_header(),
            ParseState::ReadingFieldBody { part, sink } => self.read_field_body(part, sink).await,
            ParseState::ReadingFileBody { part, sink } => self.read_file_body(part, sink).await,
            ParseState::Terminated => {
                drop(self.buffer.read_full_buf());
                Ok((ParseState::Terminated, false))
            }
            ParseState::Failed => Err(Error::MalformedMultipart("parser already failed")),
        }
    }

    fn read_first_boundary(&mut self) -> (ParseState, bool) {
        match self.buffer.find(self.matcher.first()) {
            Some(idx) => {
                self.buffer.discard(idx + self.matcher.first_len());
                (ParseState::AwaitingBoundary, true)
            }
            None => {
                self.buffer.retain_tail(self.matcher.retain_len());
                (ParseState::AwaitingFirstBoundary, false)
            }
        }
    }

    fn read_boundary_suffix(&mut self) -> crate::Result<(ParseState, bool)> {
        if self.buffer.starts_with(b" ") || self.buffer.starts_with(b"\t") {
            // transport padding
            self.buffer.discard(1);
            return Ok((ParseState::AwaitingBoundary, true));
        }

        if self.buffer.len() < 2 {
            return Ok((ParseState::AwaitingBoundary, false));
        }

        if self.buffer.starts_with(constants::BOUNDARY_EXT.as_bytes()) {
            drop(self.buffer.read_full_buf());
            return Ok((ParseState::Terminated, false));
        }

        if self.buffer.starts_with(constants::CRLF.as_bytes()) {
            self.buffer.discard(2);
            return Ok((ParseState::ReadingHeader, true));
        }

        Err(Error::MalformedMultipart("boundary not followed by CRLF or --"))
    }

    fn read_header(&mut self) -> crate::Result<(ParseState, bool)> {
        let limit = self.limits.max_part_header_size;

        if self.buffer.starts_with(constants::CRLF.as_bytes()) {
            return Err(Error::InvalidDisposition);
        }

        let header_len = match self.buffer.find(self.matcher.header_end()) {
            Some(idx) => idx + constants::CRLF_CRLF.len(),
            None if self.buffer.len() > limit => return Err(Error::HeaderTooLarge { limit }),
            None => return Ok((ParseState::ReadingHeader, false)),
        };

        if header_len > limit {
            return Err(Error::HeaderTooLarge { limit });
        }

        let header_bytes = self.buffer.read_exact(header_len);
        let part = PartDescriptor::parse(&header_bytes)?;

        self.part_count += 1;
        if self.part_count > self.limits.max_parts {
            return Err(Error::TooManyParts {
                limit: self.limits.max_parts,
            });
        }

        trace!("part '{}' started, file name: {:?}", part.name, part.file_name);

        if part.is_file() {
            self.file_count += 1;
            if self.file_count > self.limits.max_files {
                return Err(Error::TooManyFiles {
                    limit: self.limits.max_files,
                });
            }

            Ok((ParseState::ReadingFileBody { part, sink: None }, true))
        } else {
            let sink = FieldSink::new(part.name.clone(), self.limits.max_field_size);
            Ok((ParseState::ReadingFieldBody { part, sink }, true))
        }
    }

    async fn read_field_body(
        &mut self,
        part: PartDescriptor,
        mut sink: FieldSink,
    ) -> crate::Result<(ParseState, bool)> {
        match self.buffer.find(self.matcher.center()) {
            Some(idx) => {
                let data = self.buffer.read_exact(idx);
                sink.push(&data)?;
                self.buffer.discard(self.matcher.center_len());

                let (name, text) = sink.finish(part.content_type.as_ref());
                debug!("field '{}' complete, {} bytes", name, data.len());

                self.store(name, FormValue::Text(text)).await;
                Ok((ParseState::AwaitingBoundary, true))
            }
            None => {
                let data = self.buffer.read_all_but(self.matcher.retain_len());
                sink.push(&data)?;
                Ok((ParseState::ReadingFieldBody { part, sink }, false))
            }
        }
    }

    async fn read_file_body(
        &mut self,
        part: PartDescriptor,
        sink: Option<FileSink>,
    ) -> crate::Result<(ParseState, bool)> {
        let mut sink = match sink {
            Some(sink) => sink,
            None => FileSink::create(&self.limits.tmp_dir, part.name.clone(), self.limits.max_file_size).await?,
        };

        match self.buffer.find(self.matcher.center()) {
            Some(idx) => {
                let data = self.buffer.read_exact(idx);
                if let Err(err) = sink.write(&data).await {
                    sink.abort().await;
                    return Err(err);
                }
                self.buffer.discard(self.matcher.center_len());

                let PartDescriptor {
                    name,
                    file_name,
                    content_type,
                } = part;

                let file = sink
                    .finish(
                        file_name.unwrap_or_default(),
                        content_type.unwrap_or(mime::APPLICATION_OCTET_STREAM),
                    )
                    .await?;
                debug!("file '{}' complete, {} bytes at {:?}", name, file.size(), file.path());

                self.store(name, FormValue::File(file)).await;
                Ok((ParseState::AwaitingBoundary, true))
            }
            None => {
                let data = self.buffer.read_all_but(self.matcher.retain_len());
                if let Err(err) = sink.write(&data).await {
                    sink.abort().await;
                    return Err(err);
                }
                Ok((ParseState::ReadingFileBody { part, sink: Some(sink) }, false))
            }
        }
    }

    async fn store(&mut self, name: String, value: FormValue) {
        if let Some(FormValue::File(replaced)) = self.form.insert(name, value) {
            let path = replaced.path().to_owned();
            if let Err(err) = replaced.clear().await {
                warn!("failed to remove replaced temporary file {:?}: {}", path, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const BODY: &str = "preamble to skip\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDAR\r\n--X-BOUNDARY--\r\nepilogue";

    fn limits(dir: &Path) -> Limits {
        Limits::new().tmp_dir(dir)
    }

    fn tmp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    async fn parse_chunks(limits: Limits, chunks: &[&[u8]]) -> crate::Result<Form> {
        let mut parser = Parser::new("X-BOUNDARY", limits)?;
        for chunk in chunks {
            parser.feed(chunk).await?;
        }
        parser.on_stream_end().await
    }

    fn snapshot(form: &Form) -> Vec<(String, String, Option<Vec<u8>>)> {
        form.iter()
            .map(|(name, value)| match value {
                FormValue::Text(text) => (name.to_owned(), text.clone(), None),
                FormValue::File(file) => (
                    name.to_owned(),
                    file.file_name().to_owned(),
                    Some(std::fs::read(file.path()).unwrap()),
                ),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let form = parse_chunks(limits(dir.path()), &[BODY.as_bytes()])
            .await
            .unwrap();

        assert_eq!(form.len(), 2);
        assert_eq!(form.text("My Field"), Some("abcd"));

        let file = form.file("File Field").unwrap();
        assert_eq!(file.file_name(), "a-text-file.txt");
        assert_eq!(file.content_type(), &mime::TEXT_PLAIN);
        assert_eq!(
            std::fs::read(file.path()).unwrap(),
            b"Hello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDAR"
        );
        assert!(file.path().starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_chunk_boundary_invariance() {
        let dir = tempfile::tempdir().unwrap();
        let body = BODY.as_bytes();

        let expected = snapshot(&parse_chunks(limits(dir.path()), &[body]).await.unwrap());

        for size in 1..body.len() {
            let chunks: Vec<&[u8]> = body.chunks(size).collect();
            let form = parse_chunks(limits(dir.path()), &chunks).await.unwrap();
            assert_eq!(snapshot(&form), expected, "chunk size {}", size);
        }

        for split in 1..body.len() {
            let (a, b) = body.split_at(split);
            let form = parse_chunks(limits(dir.path()), &[a, b]).await.unwrap();
            assert_eq!(snapshot(&form), expected, "split at {}", split);
        }

        assert_eq!(tmp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let form = parse_chunks(limits(dir.path()), &[b"--X-BOUNDARY--\r\n"])
            .await
            .unwrap();

        assert!(form.is_empty());
    }

    #[tokio::test]
    async fn test_transport_padding() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY \t\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--X-BOUNDARY--";
        let form = parse_chunks(limits(dir.path()), &[body]).await.unwrap();

        assert_eq!(form.text("a"), Some("1"));
    }

    #[tokio::test]
    async fn test_empty_file_part() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"\"\r\n\r\n\r\n--X-BOUNDARY--\r\n";
        let form = parse_chunks(limits(dir.path()), &[body]).await.unwrap();

        let file = form.file("f").unwrap();
        assert_eq!(file.file_name(), "");
        assert_eq!(file.size(), 0);
        assert_eq!(file.content_type(), &mime::APPLICATION_OCTET_STREAM);
    }

    #[tokio::test]
    async fn test_repeated_name_replaces_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"1.txt\"\r\n\r\none\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"2.txt\"\r\n\r\ntwo\r\n--X-BOUNDARY--\r\n";
        let form = parse_chunks(limits(dir.path()), &[body]).await.unwrap();

        assert_eq!(form.len(), 1);
        let file = form.file("f").unwrap();
        assert_eq!(file.file_name(), "2.txt");
        assert_eq!(std::fs::read(file.path()).unwrap(), b"two");
        assert_eq!(tmp_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_premature_close_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"; filename=\"a.bin\"\r\n\r\nfirst\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"; filename=\"b.bin\"\r\n\r\npartial content";

        let mut parser = Parser::new("X-BOUNDARY", limits(dir.path())).unwrap();
        parser.feed(body).await.unwrap();
        assert_eq!(tmp_files(dir.path()), 2);

        assert_eq!(parser.on_stream_end().await.unwrap_err(), Error::PrematureClose);
        assert_eq!(tmp_files(dir.path()), 0);

        let mut parser = Parser::new("X-BOUNDARY", limits(dir.path())).unwrap();
        parser.feed(body).await.unwrap();
        assert_eq!(parser.on_stream_closed_early().await, Error::PrematureClose);
        assert_eq!(tmp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_file_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"ok\"; filename=\"ok.bin\"\r\n\r\n12345\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"big\"; filename=\"big.bin\"\r\n\r\n123456\r\n--X-BOUNDARY--\r\n";

        let chunks: Vec<&[u8]> = body.chunks(7).collect();
        let err = parse_chunks(limits(dir.path()).max_file_size(5), &chunks)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::FileTooLarge {
                limit: 5,
                field_name: "big".to_owned()
            }
        );
        assert_eq!(tmp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_field_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n0123456789\r\n--X-BOUNDARY--\r\n";

        let form = parse_chunks(limits(dir.path()).max_field_size(10), &[body])
            .await
            .unwrap();
        assert_eq!(form.text("f"), Some("0123456789"));

        let err = parse_chunks(limits(dir.path()).max_field_size(9), &[body])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::FieldTooLarge {
                limit: 9,
                field_name: "f".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_field_limit_bounds_unterminated_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = Parser::new("X-BOUNDARY", limits(dir.path()).max_field_size(16)).unwrap();

        parser
            .feed(b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n")
            .await
            .unwrap();

        let mut result = Ok(());
        for _ in 0..64 {
            result = parser.feed(b"xxxx").await;
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(Error::FieldTooLarge { limit: 16, .. })));
    }

    #[tokio::test]
    async fn test_header_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a-rather-long-field-name\"\r\n\r\nv\r\n--X-BOUNDARY--\r\n";

        let err = parse_chunks(limits(dir.path()).max_part_header_size(32), &[body])
            .await
            .unwrap_err();
        assert_eq!(err, Error::HeaderTooLarge { limit: 32 });

        let mut parser = Parser::new("X-BOUNDARY", limits(dir.path()).max_part_header_size(32)).unwrap();
        parser.feed(b"--X-BOUNDARY\r\nX-Filler: ").await.unwrap();
        let err = parser.feed(&[b'a'; 64]).await.unwrap_err();
        assert_eq!(err, Error::HeaderTooLarge { limit: 32 });
    }

    #[tokio::test]
    async fn test_too_many_parts() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"; filename=\"a.bin\"\r\n\r\n1\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"c\"\r\n\r\n3\r\n--X-BOUNDARY--\r\n";

        assert!(parse_chunks(limits(dir.path()).max_parts(3), &[body])
            .await
            .is_ok());

        let err = parse_chunks(limits(dir.path()).max_parts(2), &[body])
            .await
            .unwrap_err();
        assert_eq!(err, Error::TooManyParts { limit: 2 });
        assert_eq!(tmp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_too_many_files() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"; filename=\"a.bin\"\r\n\r\n1\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"; filename=\"b.bin\"\r\n\r\n2\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"t\"\r\n\r\n3\r\n--X-BOUNDARY--\r\n";

        assert!(parse_chunks(limits(dir.path()).max_files(2), &[body])
            .await
            .is_ok());

        let err = parse_chunks(limits(dir.path()).max_files(1), &[body])
            .await
            .unwrap_err();
        assert_eq!(err, Error::TooManyFiles { limit: 1 });
        assert_eq!(tmp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_request_too_large() {
        let dir = tempfile::tempdir().unwrap();

        let err = parse_chunks(limits(dir.path()).max_request_size(100), &[BODY.as_bytes()])
            .await
            .unwrap_err();
        assert_eq!(err, Error::RequestTooLarge { limit: 100 });
        assert_eq!(tmp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_structural_errors() {
        let dir = tempfile::tempdir().unwrap();

        let body = b"--X-BOUNDARY\r\nContent-Disposition: attachment; name=\"a\"\r\n\r\n1\r\n--X-BOUNDARY--";
        let err = parse_chunks(limits(dir.path()), &[body]).await.unwrap_err();
        assert_eq!(err, Error::InvalidDisposition);

        let body = b"--X-BOUNDARY\r\n\r\n1\r\n--X-BOUNDARY--";
        let err = parse_chunks(limits(dir.path()), &[body]).await.unwrap_err();
        assert_eq!(err, Error::InvalidDisposition);

        let body = b"--X-BOUNDARY\r\nContent-Disposition: form-data\r\n\r\n1\r\n--X-BOUNDARY--";
        let err = parse_chunks(limits(dir.path()), &[body]).await.unwrap_err();
        assert_eq!(err, Error::MissingPartName);

        let body = b"--X-BOUNDARYjunk\r\n";
        let err = parse_chunks(limits(dir.path()), &[body]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
    }

    #[tokio::test]
    async fn test_feed_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = Parser::new("X-BOUNDARY", limits(dir.path())).unwrap();

        assert!(parser.feed(b"--X-BOUNDARY\r\n\r\n").await.is_err());
        assert!(matches!(
            parser.feed(b"more").await,
            Err(Error::MalformedMultipart(_))
        ));
    }

    #[test]
    fn test_invalid_boundary() {
        assert_eq!(
            Parser::new("", Limits::default()).unwrap_err(),
            Error::MissingBoundary
        );
    }
}
