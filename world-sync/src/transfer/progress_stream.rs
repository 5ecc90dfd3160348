//! Byte stream wrapper feeding an [`UploadProgress`].

use super::progress::UploadProgress;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Passes chunks through unchanged while counting them
pub struct ProgressStream<S> {
    inner: S,
    progress: UploadProgress,
    finished: bool,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, progress: UploadProgress) -> Self {
        Self {
            inner,
            progress,
            finished: false,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.progress.advance(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    this.progress.finish();
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};

    #[tokio::test]
    async fn test_chunks_pass_through() {
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
        ];
        let mut wrapped = ProgressStream::new(stream::iter(chunks), UploadProgress::new("test", 7));

        let mut collected = Vec::new();
        while let Some(chunk) = wrapped.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(collected, b"abcdefg");
        assert_eq!(wrapped.progress.transferred_bytes(), 7);
        assert!(wrapped.finished);
    }
}
