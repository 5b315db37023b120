//! The full-duplex byte stream abstraction every endpoint produces.

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A [`Stream`] is anything that is both readable and writable, type-erased
/// behind a single trait object so the splicer and loop driver never need to
/// know which transport produced either side of a relay.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxStream = Box<dyn Stream>;

#[pin_project]
pub(crate) struct Combined<R, W> {
    #[pin]
    r: R,
    #[pin]
    w: W,
}

/// Glue a separately-owned reader and writer into a single [`Stream`]. Used
/// by transports (stdio, exec) whose underlying OS handles are naturally
/// split in two.
pub fn combine<R, W>(r: R, w: W) -> impl Stream
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    Combined { r, w }
}

impl<R: AsyncRead, W> AsyncRead for Combined<R, W> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.project();
        this.r.poll_read(cx, buf)
    }
}

impl<R, W: AsyncWrite> AsyncWrite for Combined<R, W> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        let this = self.as_mut().project();
        this.w.poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.as_mut().project();
        this.w.poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.as_mut().project();
        this.w.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn combine_round_trips() {
        let (mut a_r, mut a_w) = tokio::net::UnixStream::pair().unwrap();
        let (b_r, mut b_w) = tokio::net::UnixStream::pair().unwrap();
        let mut combined = combine(b_r, a_w);

        b_w.write_all(b"irrelevant").await.unwrap();
        tokio::spawn(async move {
            combined.write_all(b"hello").await.unwrap();
        });

        let mut buf = [0_u8; 5];
        a_r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
