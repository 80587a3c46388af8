use crate::form::Form;
use crate::timeout::TimeoutGuard;
use crate::{Error, Limits, Parser};
use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
use std::pin::Pin;
#[cfg(feature = "tokio-io")]
use {tokio::io::AsyncRead, tokio_util::io::ReaderStream};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Parses one `multipart/form-data` body from a stream of chunks into a
/// [`Form`], spooling file parts to disk.
///
/// The stream is read in order, one chunk at a time, under the request and
/// chunk timeouts of the [`Limits`]. The request timeout runs from the moment
/// the `Multipart` is constructed. A stream item error is an abrupt
/// disconnection and fails with [`Error::PrematureClose`], unless the closing
/// boundary was already seen.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use futures_util::stream::iter;
/// use multer_spool::{Limits, Multipart};
/// use std::convert::Infallible;
///
/// # async fn run() {
/// let chunks = vec!["--X-BOUNDARY\r\nContent-Disposition: form-da", "ta; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n"];
/// let stream = iter(chunks.into_iter().map(|chunk| Result::<Bytes, Infallible>::Ok(Bytes::from(chunk))));
///
/// let form = Multipart::new(stream, "X-BOUNDARY", Limits::default()).unwrap().parse().await.unwrap();
/// assert_eq!(form.text("my_text_field"), Some("abcd"));
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Multipart<'r> {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send + 'r>>,
    parser: Parser,
    guard: TimeoutGuard,
}

impl<'r> Multipart<'r> {
    /// Construct a new `Multipart` instance with the given [`Bytes`] stream and
    /// the boundary.
    pub fn new<S, O, E, B>(stream: S, boundary: B, limits: Limits) -> crate::Result<Self>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: AsRef<str>,
    {
        let stream = stream.map_ok(|b| b.into()).map_err(|err| -> BoxError { err.into() });
        let guard = TimeoutGuard::start(limits.request_timeout, limits.chunk_timeout);

        Ok(Multipart {
            stream: Box::pin(stream),
            parser: Parser::new(boundary, limits)?,
            guard,
        })
    }

    /// Construct a new `Multipart` instance from the request headers: the
    /// boundary comes from `Content-Type`, and a declared `Content-Length`
    /// above [`Limits::max_request_size`] is rejected before any byte is read.
    pub fn with_headers<S, O, E>(stream: S, headers: &HeaderMap, limits: Limits) -> crate::Result<Self>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .ok_or(Error::MissingOrInvalidContentType)?;

        let boundary = crate::parse_boundary(content_type)?;

        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.trim().parse::<u64>().ok());

        check_content_length(content_length, &limits)?;

        Multipart::new(stream, boundary, limits)
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`] reader
    /// and the boundary.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    pub fn with_reader<R, B>(reader: R, boundary: B, limits: Limits) -> crate::Result<Self>
    where
        R: AsyncRead + Send + 'r,
        B: AsRef<str>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::new(stream, boundary, limits)
    }

    /// Reads the whole body and returns the collected form.
    ///
    /// On failure, every temporary file this parse created has already been
    /// removed when the error is returned.
    pub async fn parse(self) -> crate::Result<Form> {
        let Multipart {
            mut stream,
            mut parser,
            guard,
        } = self;

        loop {
            match guard.next(&mut stream).await {
                Ok(Some(Ok(chunk))) => match guard.within(parser.feed(&chunk)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(err) => return Err(parser.fail(err).await),
                },
                Ok(Some(Err(_))) if parser.is_terminated() => return parser.on_stream_end().await,
                Ok(Some(Err(err))) => {
                    debug!("multipart stream closed early: {}", err);
                    return Err(parser.on_stream_closed_early().await);
                }
                Ok(None) => return parser.on_stream_end().await,
                Err(err) => return Err(parser.fail(err).await),
            }
        }
    }
}

fn check_content_length(content_length: Option<u64>, limits: &Limits) -> crate::Result<()> {
    match content_length {
        Some(len) if len > limits.max_request_size => {
            debug!(
                "declared content length {} exceeds the request size limit {}",
                len, limits.max_request_size
            );
            Err(Error::RequestTooLarge {
                limit: limits.max_request_size,
            })
        }
        _ => Ok(()),
    }
}
