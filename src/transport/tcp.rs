//! TCP transport speaking ZMTP 3.0 as a DEALER socket.
//!
//! The socket is driven with non-blocking `try_read` / `try_write`. The TCP
//! connect itself is a stored future that is polled opportunistically by
//! `send` / `try_recv` and awaited by `readable`, so `open` never blocks.
//! Outbound messages sent before the connection completes are queued.
//!
//! Must be used from within a tokio runtime with the I/O driver enabled.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use futures::FutureExt;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::zmtp::{encode_message, greeting, ready_command, ZmtpDecoder};
use super::Transport;

/// ZMTP socket type announced to the server.
pub const SOCKET_TYPE: &str = "DEALER";

/// Read buffer size per `try_read` call.
const READ_CHUNK: usize = 64 * 1024;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

/// Normalize `tcp://host:port` or `host:port` to `host:port`.
///
/// # Errors
///
/// `InvalidInput` if no port separator is present.
pub fn parse_address(address: &str) -> io::Result<String> {
    let host_port = address.strip_prefix("tcp://").unwrap_or(address);
    match host_port.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() => Ok(host_port.to_string()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid address '{address}', expected tcp://host:port"),
        )),
    }
}

/// ZMTP DEALER over a tokio `TcpStream`.
///
/// At most one of `connecting` and `stream` is set; neither means closed.
pub struct TcpTransport {
    connecting: Option<ConnectFuture>,
    stream: Option<TcpStream>,
    decoder: ZmtpDecoder,
    /// Encoded bytes not yet written (greeting, READY, queued messages).
    outbound: BytesMut,
    /// Complete messages not yet handed out.
    inbound: VecDeque<Vec<Bytes>>,
    /// Connect failure observed by `readable`, reported by the next call.
    failure: Option<io::Error>,
    read_buf: Vec<u8>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connecting: None,
            stream: None,
            decoder: ZmtpDecoder::new(),
            outbound: BytesMut::with_capacity(4096),
            inbound: VecDeque::new(),
            failure: None,
            read_buf: vec![0u8; READ_CHUNK],
        }
    }

    pub fn is_open(&self) -> bool {
        self.connecting.is_some() || self.stream.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Finish a pending connect if possible, then write what the socket takes.
    fn drive(&mut self) -> io::Result<()> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }

        if let Some(connect) = &mut self.connecting {
            let result = match connect.as_mut().now_or_never() {
                None => return Ok(()),
                Some(result) => result,
            };
            self.connecting = None;
            self.established(result?)?;
        }

        if let Some(stream) = &self.stream {
            while !self.outbound.is_empty() {
                match stream.try_write(&self.outbound) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => {
                        trace!(bytes = n, "wrote");
                        self.outbound.advance(n);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    fn established(&mut self, stream: TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "tcp connected");
        self.stream = Some(stream);
        Ok(())
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, address: &str, identity: &str) -> io::Result<()> {
        let target = parse_address(address)?;
        self.close();

        self.outbound.extend_from_slice(&greeting(false));
        self.outbound
            .extend_from_slice(&ready_command(SOCKET_TYPE, identity));
        self.connecting = Some(Box::pin(TcpStream::connect(target)));
        Ok(())
    }

    fn close(&mut self) {
        self.connecting = None;
        self.stream = None;
        self.decoder.reset();
        self.outbound.clear();
        self.inbound.clear();
        self.failure = None;
    }

    fn send(&mut self, frames: Vec<Bytes>) -> io::Result<()> {
        if !self.is_open() {
            return Err(self
                .failure
                .take()
                .unwrap_or_else(|| io::ErrorKind::NotConnected.into()));
        }
        encode_message(&frames, &mut self.outbound);
        self.drive()
    }

    fn try_recv(&mut self) -> io::Result<Option<Vec<Bytes>>> {
        if let Some(message) = self.inbound.pop_front() {
            return Ok(Some(message));
        }
        self.drive()?;

        if let Some(stream) = &self.stream {
            loop {
                match stream.try_read(&mut self.read_buf) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "connection closed by peer",
                        ))
                    }
                    Ok(n) => {
                        trace!(bytes = n, "read");
                        let messages = self.decoder.push(&self.read_buf[..n])?;
                        self.inbound.extend(messages);
                        if !self.inbound.is_empty() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(self.inbound.pop_front())
    }

    fn readable(&mut self) -> impl Future<Output = ()> + Send + '_ {
        async move {
            if !self.inbound.is_empty() || self.failure.is_some() {
                return;
            }
            if let Some(connect) = &mut self.connecting {
                let result = connect.await;
                self.connecting = None;
                match result {
                    Ok(stream) => {
                        if let Err(err) = self.established(stream) {
                            self.failure = Some(err);
                        }
                    }
                    Err(err) => self.failure = Some(err),
                }
                // Greeting and queued messages still need writing.
                return;
            }
            match &self.stream {
                Some(stream) => {
                    let interest = if self.outbound.is_empty() {
                        Interest::READABLE
                    } else {
                        Interest::READABLE | Interest::WRITABLE
                    };
                    let _ = stream.ready(interest).await;
                }
                None => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::zmtp::ZmtpDecoder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("tcp://host:1234").unwrap(), "host:1234");
        assert_eq!(parse_address("127.0.0.1:5").unwrap(), "127.0.0.1:5");
        assert!(parse_address("tcp://host").is_err());
        assert!(parse_address(":80").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_send_when_closed() {
        let mut transport = TcpTransport::new();
        let err = transport.send(vec![Bytes::from_static(&[0x22])]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(transport.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exchange_with_zmtp_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut wire = BytesMut::new();
            wire.extend_from_slice(&greeting(true));
            wire.extend_from_slice(&ready_command("ROUTER", ""));
            encode_message(&[Bytes::from_static(&[0x03])], &mut wire);
            socket.write_all(&wire).await.unwrap();

            let mut decoder = ZmtpDecoder::new();
            let mut buf = vec![0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed early");
                let messages = decoder.push(&buf[..n]).unwrap();
                if let Some(first) = messages.into_iter().next() {
                    return (decoder.peer_identity().cloned(), first);
                }
            }
        });

        let mut transport = TcpTransport::new();
        transport.open(&address, "host/1/1/1").unwrap();
        transport.send(vec![Bytes::from_static(&[0x22])]).unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Some(message) = transport.try_recv().unwrap() {
                    return message;
                }
                transport.readable().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(received, vec![Bytes::from_static(&[0x03])]);

        let (identity, first) = server.await.unwrap();
        assert_eq!(identity, Some(Bytes::from_static(b"host/1/1/1")));
        assert_eq!(first, vec![Bytes::from_static(&[0x22])]);
    }
}
