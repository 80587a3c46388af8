use futures_util::future;
use futures_util::stream::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

/// The two independent timers of one parse.
///
/// The request deadline is fixed when the guard is created; the chunk timer
/// restarts with every wait for the next chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutGuard {
    request_deadline: Option<Instant>,
    chunk_timeout: Option<Duration>,
}

impl TimeoutGuard {
    pub fn start(request_timeout: Option<Duration>, chunk_timeout: Option<Duration>) -> Self {
        TimeoutGuard {
            request_deadline: request_timeout.map(|timeout| Instant::now() + timeout),
            chunk_timeout,
        }
    }

    /// Waits for the next item of `stream`, unless one of the timers fires
    /// first.
    pub async fn next<S>(&self, stream: &mut S) -> crate::Result<Option<S::Item>>
    where
        S: Stream + Unpin,
    {
        let chunk_timer = async {
            match self.chunk_timeout {
                Some(timeout) => time::sleep(timeout).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = self.request_timer() => Err(crate::Error::RequestTimeout),
            _ = chunk_timer => Err(crate::Error::ChunkTimeout),
            item = stream.next() => Ok(item),
        }
    }

    /// Runs `fut` to completion unless the request deadline passes first.
    pub async fn within<F: Future>(&self, fut: F) -> crate::Result<F::Output> {
        tokio::select! {
            biased;

            _ = self.request_timer() => Err(crate::Error::RequestTimeout),
            output = fut => Ok(output),
        }
    }

    async fn request_timer(&self) {
        match self.request_deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}
