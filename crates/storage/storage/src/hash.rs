//! Streaming content digests in the `sha-256:<hex>` format.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Algorithm tag prefixed to every digest string.
pub const HASH_PREFIX: &str = "sha-256:";

fn format_digest(hasher: Sha256) -> String {
    format!("{HASH_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Digest of an in-memory payload.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format_digest(hasher)
}

/// An [`AsyncRead`] adapter that hashes and counts bytes as they pass through.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    len: u64,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            len: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been read yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the adapter, returning `(digest, length)`.
    pub fn finish(self) -> (String, u64) {
        (format_digest(self.hasher), self.len)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        this.hasher.update(fresh);
        this.len += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}

/// An [`AsyncWrite`] sink that only hashes and counts what is written to it.
///
/// Used to verify stored content without buffering it.
#[derive(Debug, Default)]
pub struct HashingSink {
    hasher: Sha256,
    len: u64,
}

impl HashingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the sink, returning `(digest, length)`.
    pub fn finish(self) -> (String, u64) {
        (format_digest(self.hasher), self.len)
    }
}

impl AsyncWrite for HashingSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.hasher.update(buf);
        this.len += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
