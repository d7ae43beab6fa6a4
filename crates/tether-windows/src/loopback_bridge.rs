use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::os::windows::io::OwnedSocket;
use tether_core::{Bridge, BridgePair, Endpoint, TetherConfig, TetherError};
use tracing::debug;

/// Loopback-duplication bridge.
///
/// Sockets created by the standard library are overlapped and non-inheritable, so they
/// cannot serve as a child's standard handles. The child side is therefore a raw WinSock
/// socket created without `WSA_FLAG_OVERLAPPED`, connected through a throwaway loopback
/// listener to a socket the controller keeps.
#[derive(Debug, Clone)]
pub struct LoopbackBridge {
    localhost: Ipv4Addr,
}

impl Default for LoopbackBridge {
    fn default() -> Self {
        Self {
            localhost: Ipv4Addr::LOCALHOST,
        }
    }
}

impl LoopbackBridge {
    pub fn new(config: &TetherConfig) -> Result<Self, TetherError> {
        match config.localhost_addr() {
            Ok(IpAddr::V4(localhost)) => Ok(Self { localhost }),
            Ok(IpAddr::V6(addr)) => Err(TetherError::ConfigurationError(format!(
                "loopback bridge needs an IPv4 address, got {addr}"
            ))),
            Err(e) => Err(TetherError::ConfigurationError(e.to_string())),
        }
    }

    fn failed(step: &str, error: std::io::Error) -> TetherError {
        TetherError::BridgeFailed(format!("{step}: {error}"))
    }

    fn listen(&self) -> Result<(TcpListener, SocketAddrV4), TetherError> {
        // Binding also performs WSAStartup on behalf of the raw calls below
        let listener =
            TcpListener::bind((self.localhost, 0)).map_err(|e| Self::failed("bind", e))?;
        match listener.local_addr().map_err(|e| Self::failed("getsockname", e))? {
            SocketAddr::V4(addr) => Ok((listener, addr)),
            SocketAddr::V6(addr) => Err(TetherError::BridgeFailed(format!(
                "listener bound to non-IPv4 address {addr}"
            ))),
        }
    }

    /// Connect a fresh child socket to `target` and accept it on `listener`.
    /// The listener is closed on return, whether or not the pair was created.
    fn connect_through(
        listener: TcpListener,
        target: SocketAddrV4,
    ) -> Result<BridgePair, TetherError> {
        // From here on every early return drops, and so closes, what was created so far
        let child = raw::stream_socket().map_err(|e| Self::failed("WSASocketW", e))?;
        raw::set_nonblocking(&child, true).map_err(|e| Self::failed("ioctlsocket", e))?;
        raw::start_connect(&child, target).map_err(|e| Self::failed("connect", e))?;

        let (accepted, peer) = listener.accept().map_err(|e| Self::failed("accept", e))?;
        drop(listener);

        raw::set_nonblocking(&child, false).map_err(|e| Self::failed("ioctlsocket", e))?;

        debug!(listener = %target, peer = %peer, "Created loopback pair");
        Ok(BridgePair {
            controller: Endpoint::new(OwnedSocket::from(accepted)),
            child: Endpoint::new(child),
        })
    }
}

impl Bridge for LoopbackBridge {
    fn bridge(&self) -> Result<BridgePair, TetherError> {
        let (listener, addr) = self.listen()?;
        Self::connect_through(listener, addr)
    }
}

mod raw {
    use std::io;
    use std::net::SocketAddrV4;
    use std::os::windows::io::{AsRawSocket, FromRawSocket, OwnedSocket, RawSocket};
    use windows::Win32::Networking::WinSock::{
        AF_INET, FIONBIO, IN_ADDR, IN_ADDR_0, IPPROTO_TCP, SOCK_STREAM, SOCKADDR, SOCKADDR_IN,
        SOCKET, SOCKET_ERROR, WSAEWOULDBLOCK, WSAGetLastError, WSASocketW, connect, ioctlsocket,
    };

    fn last_error() -> io::Error {
        io::Error::from_raw_os_error(unsafe { WSAGetLastError() }.0)
    }

    fn socket(owned: &OwnedSocket) -> SOCKET {
        SOCKET(owned.as_raw_socket() as usize)
    }

    /// TCP socket usable as a standard handle of a child process
    pub fn stream_socket() -> io::Result<OwnedSocket> {
        let raw = unsafe { WSASocketW(AF_INET.0 as i32, SOCK_STREAM.0, IPPROTO_TCP.0, None, 0, 0) }
            .map_err(io::Error::from)?;
        // SAFETY: WSASocketW returned a fresh socket that nothing else owns
        Ok(unsafe { OwnedSocket::from_raw_socket(raw.0 as RawSocket) })
    }

    pub fn set_nonblocking(owned: &OwnedSocket, nonblocking: bool) -> io::Result<()> {
        let mut mode = u32::from(nonblocking);
        if unsafe { ioctlsocket(socket(owned), FIONBIO, &mut mode) } == SOCKET_ERROR {
            return Err(last_error());
        }
        Ok(())
    }

    /// Begin connecting a non-blocking socket. An in-progress connect is success.
    pub fn start_connect(owned: &OwnedSocket, addr: SocketAddrV4) -> io::Result<()> {
        let sockaddr = SOCKADDR_IN {
            sin_family: AF_INET,
            sin_port: addr.port().to_be(),
            sin_addr: IN_ADDR {
                S_un: IN_ADDR_0 {
                    S_addr: u32::from_ne_bytes(addr.ip().octets()),
                },
            },
            ..Default::default()
        };

        let rc = unsafe {
            connect(
                socket(owned),
                &sockaddr as *const SOCKADDR_IN as *const SOCKADDR,
                std::mem::size_of::<SOCKADDR_IN>() as i32,
            )
        };
        if rc == SOCKET_ERROR {
            let error = unsafe { WSAGetLastError() };
            if error != WSAEWOULDBLOCK {
                return Err(io::Error::from_raw_os_error(error.0));
            }
        }
        Ok(())
    }
}
