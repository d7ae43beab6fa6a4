//! Owned OS handles representing one side of a duplex byte stream.

use std::process::Stdio;

#[cfg(unix)]
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawSocket, AsSocket, OwnedSocket};

#[cfg(unix)]
pub type RawEndpoint = OwnedFd;
#[cfg(windows)]
pub type RawEndpoint = OwnedSocket;

/// Async stream an endpoint turns into once it is handed to the controller
#[cfg(unix)]
pub type EndpointStream = tokio::net::UnixStream;
#[cfg(windows)]
pub type EndpointStream = tokio::net::TcpStream;

/// One side of a duplex byte stream.
///
/// The endpoint owns exactly one OS handle. Closing is idempotent: once closed the
/// handle is gone and every further I/O conversion fails instead of touching a stale
/// handle value.
#[derive(Debug)]
pub struct Endpoint {
    handle: Option<RawEndpoint>,
}

impl Endpoint {
    pub fn new(handle: RawEndpoint) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Close the underlying handle. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(handle = self.describe(&handle), "Closing endpoint");
            drop(handle);
        }
    }

    fn handle(&self) -> std::io::Result<&RawEndpoint> {
        self.handle.as_ref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "endpoint is closed")
        })
    }

    /// Release ownership of the raw handle
    pub fn into_raw(mut self) -> std::io::Result<RawEndpoint> {
        self.handle.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "endpoint is closed")
        })
    }

    /// Raw handle value for diagnostics, `None` once closed
    pub fn raw_value(&self) -> Option<u64> {
        self.handle.as_ref().map(|h| self.describe(h))
    }

    #[cfg(unix)]
    fn describe(&self, handle: &RawEndpoint) -> u64 {
        handle.as_raw_fd() as u64
    }

    #[cfg(windows)]
    fn describe(&self, handle: &RawEndpoint) -> u64 {
        handle.as_raw_socket()
    }

    /// A fresh `Stdio` bound to this endpoint, suitable for one standard stream of a child.
    ///
    /// Each call duplicates the handle, so the endpoint stays usable and owned here.
    #[cfg(unix)]
    pub fn to_stdio(&self) -> std::io::Result<Stdio> {
        let duplicate = self.handle()?.as_fd().try_clone_to_owned()?;
        Ok(Stdio::from(duplicate))
    }

    /// A fresh `Stdio` bound to this endpoint, suitable for one standard stream of a child.
    ///
    /// The socket is duplicated as a plain handle (not through `WSADuplicateSocket`) so a
    /// non-overlapped socket keeps working as a console standard handle.
    #[cfg(windows)]
    pub fn to_stdio(&self) -> std::io::Result<Stdio> {
        use std::os::windows::io::{BorrowedHandle, RawHandle};

        let raw = self.handle()?.as_socket().as_raw_socket() as RawHandle;
        // SAFETY: the socket is owned by `self` and outlives this borrow.
        let borrowed = unsafe { BorrowedHandle::borrow_raw(raw) };
        let duplicate = borrowed.try_clone_to_owned()?;
        Ok(Stdio::from(duplicate))
    }

    /// Turn the endpoint into an async stream registered with the current tokio runtime
    #[cfg(unix)]
    pub fn into_stream(self) -> std::io::Result<EndpointStream> {
        let stream = std::os::unix::net::UnixStream::from(self.into_raw()?);
        stream.set_nonblocking(true)?;
        EndpointStream::from_std(stream)
    }

    /// Turn the endpoint into an async stream registered with the current tokio runtime
    #[cfg(windows)]
    pub fn into_stream(self) -> std::io::Result<EndpointStream> {
        let stream = std::net::TcpStream::from(self.into_raw()?);
        stream.set_nonblocking(true)?;
        EndpointStream::from_std(stream)
    }
}

impl From<RawEndpoint> for Endpoint {
    fn from(handle: RawEndpoint) -> Self {
        Endpoint::new(handle)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (Endpoint, Endpoint) {
        let (a, b) = UnixStream::pair().unwrap();
        (Endpoint::new(a.into()), Endpoint::new(b.into()))
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut a, _b) = pair();
        assert!(!a.is_closed());
        assert!(a.raw_value().is_some());

        a.close();
        a.close();

        assert!(a.is_closed());
        assert!(a.raw_value().is_none());
        assert!(a.to_stdio().is_err());
    }

    #[test]
    fn test_closed_endpoint_cannot_be_converted() {
        let (mut a, _b) = pair();
        a.close();
        let err = a.into_raw().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_into_stream_carries_bytes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (a, b) = pair();
        let mut a = a.into_stream().unwrap();
        let mut b = b.into_stream().unwrap();

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_closing_one_side_surfaces_eof() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (a, b) = pair();
        let mut a = a.into_stream().unwrap();
        let mut b = b.into_stream().unwrap();

        a.write_all(b"tail").await.unwrap();
        drop(a);

        let mut rest = Vec::new();
        b.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"tail");
    }
}
