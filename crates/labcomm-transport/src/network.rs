//! TCP and UDP channels, server or client side, with heartbeat-gated reads
//! and an optional self-driving listen loop.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::events::EventSink;
use crate::kind::{ChannelState, StateCell, TransportKind, WorkMode};

/// Pending-connection backlog for TCP servers.
pub const LISTEN_BACKLOG: u32 = 100;

/// Receive buffer size for the listen loop and `read_line`.
pub const LISTEN_BUFFER_SIZE: usize = 1024;

/// Liveness byte sent before every receive.
pub const HEARTBEAT: [u8; 1] = [0x00];

enum RecvHalf {
    Tcp(OwnedReadHalf),
    Udp(Arc<UdpSocket>),
}

impl RecvHalf {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf).await,
            Self::Udp(socket) => socket.recv(buf).await,
        }
    }
}

enum SendHalf {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>),
}

impl SendHalf {
    async fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.write_all(data).await?;
                stream.flush().await
            }
            Self::Udp(socket) => {
                let sent = socket.send(data).await?;
                if sent < data.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated ({sent} of {} bytes)", data.len()),
                    ));
                }
                Ok(())
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Self::Tcp(stream) = self {
            if let Err(err) = stream.shutdown().await {
                debug!(error = %err, "tcp shutdown failed");
            }
        }
    }
}

struct Inner {
    name: String,
    kind: TransportKind,
    addr: SocketAddr,
    mode: WorkMode,
    sink: Arc<dyn EventSink>,
    state: StateCell,
    cancel: CancellationToken,
    local_addr: StdMutex<Option<SocketAddr>>,
    listener: StdMutex<Option<TcpListener>>,
    rx: Mutex<Option<RecvHalf>>,
    tx: Mutex<Option<SendHalf>>,
}

/// A named TCP/UDP endpoint.
///
/// All operations take `&self`; the receive and send halves sit behind
/// separate async locks so a listen loop and a writer can run at once.
pub struct NetworkChannel {
    inner: Arc<Inner>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl NetworkChannel {
    /// Create an unopened channel. `host` must be an IP literal.
    pub fn new(
        name: impl Into<String>,
        host: &str,
        port: u16,
        kind: TransportKind,
        mode: WorkMode,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let ip: IpAddr = host.parse().map_err(|source| TransportError::InvalidAddress {
            host: host.to_string(),
            source,
        })?;
        Self::with_addr(name, SocketAddr::new(ip, port), kind, mode, sink)
    }

    pub fn with_addr(
        name: impl Into<String>,
        addr: SocketAddr,
        kind: TransportKind,
        mode: WorkMode,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if !kind.is_network() {
            return Err(TransportError::InvalidKind(kind.to_string()));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                kind,
                addr,
                mode,
                sink,
                state: StateCell::new(ChannelState::Unopened),
                cancel: CancellationToken::new(),
                local_addr: StdMutex::new(None),
                listener: StdMutex::new(None),
                rx: Mutex::new(None),
                tx: Mutex::new(None),
            }),
            task: StdMutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn mode(&self) -> WorkMode {
        self.inner.mode
    }

    /// The configured remote (client) or bind (server) address.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// The local socket address, known once a server has bound or a
    /// client has connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Open the channel.
    ///
    /// Servers suspend until a single peer connects (TCP) or sends its first
    /// datagram (UDP). In [`WorkMode::Auto`] the listen loop is spawned and
    /// this returns without waiting on it.
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .state
            .transition(ChannelState::Unopened, ChannelState::Connecting)
            .map_err(|state| TransportError::InvalidState {
                name: inner.name.clone(),
                state,
            })?;
        info!(channel = %inner.name, kind = %inner.kind, addr = %inner.addr, "opening channel");

        let opened = tokio::select! {
            _ = inner.cancel.cancelled() => Err(TransportError::NotConnected(inner.name.clone())),
            opened = inner.open_link() => opened,
        };
        let (rx, tx) = match opened {
            Ok(halves) => halves,
            Err(err) => {
                warn!(channel = %inner.name, error = %err, "failed to open channel");
                inner.close_link().await;
                return Err(err);
            }
        };

        *inner.rx.lock().await = Some(rx);
        *inner.tx.lock().await = Some(tx);

        // A concurrent stop wins over a late connect.
        if inner
            .state
            .transition(ChannelState::Connecting, ChannelState::Connected)
            .is_err()
        {
            inner.close_link().await;
            return Err(TransportError::NotConnected(inner.name.clone()));
        }
        info!(channel = %inner.name, mode = ?inner.mode, "channel connected");

        if inner.mode == WorkMode::Auto {
            let handle = tokio::spawn(listen_loop(Arc::clone(inner)));
            *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        Ok(())
    }

    /// Heartbeat, then a single receive into `buf`.
    ///
    /// Returns 0 when the channel is not connected or the TCP peer closed the
    /// connection. Received bytes are also published under the channel name.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let inner = &self.inner;
        if !self.is_connected() {
            debug!(channel = %inner.name, "read on unconnected channel");
            return Ok(0);
        }
        if let Err(err) = inner.heartbeat().await {
            warn!(channel = %inner.name, error = %err, "heartbeat failed");
            inner.close_link().await;
            return Err(err);
        }
        match inner.receive(buf).await {
            Ok(Some(0)) if inner.kind.is_tcp() => {
                info!(channel = %inner.name, "peer closed connection");
                inner.close_link().await;
                Ok(0)
            }
            Ok(Some(n)) => {
                trace!(channel = %inner.name, bytes = n, data = ?&buf[..n], "received");
                if n > 0 {
                    inner.sink.publish(&inner.name, &buf[..n]);
                }
                Ok(n)
            }
            Ok(None) => Ok(0),
            Err(err) => {
                warn!(channel = %inner.name, error = %err, "receive failed");
                inner.close_link().await;
                Err(err)
            }
        }
    }

    /// Read once into a 1024-byte buffer and decode the received bytes as UTF-8.
    pub async fn read_line(&self) -> Result<String> {
        let mut buf = [0u8; LISTEN_BUFFER_SIZE];
        let n = self.read(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Send the whole buffer. A failed send closes the channel.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(TransportError::NotConnected(inner.name.clone()));
        }
        match inner.transmit(data).await {
            Ok(()) => {
                trace!(channel = %inner.name, bytes = data.len(), data = ?data, "sent");
                Ok(())
            }
            Err(err) => {
                if matches!(err, TransportError::Io(_)) {
                    warn!(channel = %inner.name, error = %err, "send failed");
                    inner.close_link().await;
                }
                Err(err)
            }
        }
    }

    pub async fn write_line(&self, msg: &str) -> Result<()> {
        self.write(msg.as_bytes()).await
    }

    /// Cancel the listen loop and release the socket. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.inner.close_link().await;
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(channel = %self.inner.name, error = %err, "listen loop ended abnormally");
            }
        }
    }
}

impl Drop for NetworkChannel {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = addr;
    }

    fn bind_error(&self, source: io::Error) -> TransportError {
        TransportError::Bind {
            addr: self.addr,
            source,
        }
    }

    async fn open_link(&self) -> Result<(RecvHalf, SendHalf)> {
        match self.kind {
            TransportKind::TcpServer => {
                let socket = if self.addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(|e| self.bind_error(e))?;
                #[cfg(unix)]
                socket.set_reuseaddr(true).map_err(|e| self.bind_error(e))?;
                socket.bind(self.addr).map_err(|e| self.bind_error(e))?;
                let listener = socket
                    .listen(LISTEN_BACKLOG)
                    .map_err(|e| self.bind_error(e))?;
                self.set_local_addr(listener.local_addr().ok());
                info!(channel = %self.name, addr = ?self.local_addr_now(), "waiting for connection");

                let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
                *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
                info!(channel = %self.name, peer = %peer, "accepted connection");
                Ok(self.split_tcp(stream))
            }
            TransportKind::TcpClient => {
                let stream = TcpStream::connect(self.addr).await.map_err(|source| {
                    TransportError::Connect {
                        addr: self.addr,
                        source,
                    }
                })?;
                self.set_local_addr(stream.local_addr().ok());
                Ok(self.split_tcp(stream))
            }
            TransportKind::UdpServer => {
                let socket = UdpSocket::bind(self.addr)
                    .await
                    .map_err(|e| self.bind_error(e))?;
                self.set_local_addr(socket.local_addr().ok());
                info!(channel = %self.name, addr = ?self.local_addr_now(), "waiting for first datagram");

                // Peek so the first datagram is still delivered to the reader.
                let mut peeked = [0u8; LISTEN_BUFFER_SIZE];
                let (_, peer) = socket
                    .peek_from(&mut peeked)
                    .await
                    .map_err(TransportError::Accept)?;
                socket
                    .connect(peer)
                    .await
                    .map_err(|source| TransportError::Connect { addr: peer, source })?;
                info!(channel = %self.name, peer = %peer, "accepted datagram peer");
                Ok(split_udp(socket))
            }
            TransportKind::UdpClient => {
                let local = match self.addr {
                    SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                    SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
                };
                let socket = UdpSocket::bind(local).await.map_err(|source| {
                    TransportError::Bind {
                        addr: local,
                        source,
                    }
                })?;
                socket.connect(self.addr).await.map_err(|source| {
                    TransportError::Connect {
                        addr: self.addr,
                        source,
                    }
                })?;
                self.set_local_addr(socket.local_addr().ok());
                Ok(split_udp(socket))
            }
            TransportKind::Serial => Err(TransportError::InvalidKind(self.kind.to_string())),
        }
    }

    fn local_addr_now(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn split_tcp(&self, stream: TcpStream) -> (RecvHalf, SendHalf) {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(channel = %self.name, error = %err, "failed to set TCP_NODELAY");
        }
        let (rx, tx) = stream.into_split();
        (RecvHalf::Tcp(rx), SendHalf::Tcp(tx))
    }

    async fn heartbeat(&self) -> Result<()> {
        self.transmit(&HEARTBEAT).await?;
        trace!(channel = %self.name, "heartbeat sent");
        Ok(())
    }

    /// Send the whole buffer. Cancellation abandons a send that is stuck on
    /// a full peer window and reports `NotConnected`.
    async fn transmit(&self, data: &[u8]) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::NotConnected(self.name.clone())),
            sent = async {
                let mut tx = self.tx.lock().await;
                match tx.as_mut() {
                    Some(tx) => tx.send_all(data).await.map_err(TransportError::Io),
                    None => Err(TransportError::NotConnected(self.name.clone())),
                }
            } => sent,
        }
    }

    /// One receive, raced against cancellation. `None` means cancelled.
    async fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            received = async {
                let mut rx = self.rx.lock().await;
                match rx.as_mut() {
                    Some(rx) => rx.recv(buf).await.map(Some).map_err(TransportError::Io),
                    None => Err(TransportError::NotConnected(self.name.clone())),
                }
            } => received,
        }
    }

    async fn close_link(&self) {
        self.cancel.cancel();
        let previous = self.state.swap(ChannelState::Closed);

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(listener);

        let tx = self.tx.lock().await.take();
        if let Some(mut tx) = tx {
            tx.shutdown().await;
        }
        self.rx.lock().await.take();

        if previous != ChannelState::Closed {
            info!(channel = %self.name, "channel closed");
        }
    }
}

fn split_udp(socket: UdpSocket) -> (RecvHalf, SendHalf) {
    let socket = Arc::new(socket);
    (RecvHalf::Udp(Arc::clone(&socket)), SendHalf::Udp(socket))
}

async fn listen_loop(inner: Arc<Inner>) {
    debug!(channel = %inner.name, "listen loop started");
    while inner.state.get() == ChannelState::Connected {
        if let Err(err) = inner.heartbeat().await {
            warn!(channel = %inner.name, error = %err, "heartbeat failed");
            break;
        }
        let mut buf = vec![0u8; LISTEN_BUFFER_SIZE];
        match inner.receive(&mut buf).await {
            Ok(Some(0)) if inner.kind.is_tcp() => {
                info!(channel = %inner.name, "peer closed connection");
                break;
            }
            Ok(Some(n)) => {
                buf.truncate(n);
                trace!(channel = %inner.name, bytes = n, "publishing");
                inner.sink.publish(&inner.name, &buf);
            }
            Ok(None) => break,
            Err(err) => {
                warn!(channel = %inner.name, error = %err, "receive failed");
                break;
            }
        }
    }
    inner.close_link().await;
    debug!(channel = %inner.name, "listen loop exited");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::events::EventBus;

    const WAIT: Duration = Duration::from_secs(5);

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new())
    }

    fn server(kind: TransportKind, mode: WorkMode, sink: Arc<EventBus>) -> NetworkChannel {
        NetworkChannel::new("srv", "127.0.0.1", 0, kind, mode, sink).unwrap()
    }

    async fn bound(channel: &NetworkChannel) -> SocketAddr {
        loop {
            if let Some(addr) = channel.local_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Open `srv` and a matching client against it.
    async fn connect_pair(
        srv: &NetworkChannel,
        client_kind: TransportKind,
        client_mode: WorkMode,
        sink: Arc<EventBus>,
        first_datagram: Option<&[u8]>,
    ) -> NetworkChannel {
        let (opened, client) = tokio::join!(srv.init(), async {
            let addr = bound(srv).await;
            let client =
                NetworkChannel::with_addr("cli", addr, client_kind, client_mode, sink).unwrap();
            client.init().await.unwrap();
            if let Some(data) = first_datagram {
                client.write(data).await.unwrap();
            }
            client
        });
        opened.unwrap();
        client
    }

    #[test]
    fn serial_kind_rejected() {
        let err = NetworkChannel::new("s", "127.0.0.1", 1, TransportKind::Serial, WorkMode::Auto, bus())
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidKind(_)));
    }

    #[test]
    fn hostname_rejected() {
        let err = NetworkChannel::new(
            "s",
            "localhost",
            1,
            TransportKind::TcpClient,
            WorkMode::Auto,
            bus(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn unopened_channel_reads_nothing_and_refuses_writes() {
        let ch = server(TransportKind::TcpServer, WorkMode::Manual, bus());
        let mut buf = [0u8; 8];

        assert_eq!(ch.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            ch.write(b"x").await.unwrap_err(),
            TransportError::NotConnected(_)
        ));
        assert_eq!(ch.state(), ChannelState::Unopened);
    }

    #[tokio::test]
    async fn tcp_server_reads_client_line() {
        let sink = bus();
        let srv = server(TransportKind::TcpServer, WorkMode::Manual, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Manual, sink.clone(), None).await;
        assert!(srv.is_connected());
        assert!(cli.is_connected());

        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.subscribe("srv", move |_, payload| {
            let _ = tx.send(payload.to_vec());
        });

        cli.write_line("hello\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = srv.read(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"hello\n");
        assert_eq!(rx.recv().await.unwrap(), b"hello\n");
    }

    #[tokio::test]
    async fn read_sends_heartbeat_to_peer() {
        let sink = bus();
        let srv = server(TransportKind::TcpServer, WorkMode::Manual, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Manual, sink, None).await;

        cli.write(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        srv.read(&mut buf).await.unwrap();

        // The client's own read sends a heartbeat first, then sees the server's.
        let n = cli.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &HEARTBEAT);
    }

    #[tokio::test]
    async fn auto_server_publishes_under_channel_name() {
        let sink = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.subscribe("srv", move |topic, payload| {
            let _ = tx.send((topic.to_string(), payload.to_vec()));
        });

        let srv = server(TransportKind::TcpServer, WorkMode::Auto, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Manual, sink, None).await;

        cli.write(b"trial 1").await.unwrap();
        let (topic, payload) = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("listen loop should publish")
            .unwrap();
        assert_eq!(topic, "srv");
        assert_eq!(payload, b"trial 1");

        srv.stop().await;
        assert_eq!(srv.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn auto_client_init_returns_immediately() {
        let sink = bus();
        let srv = server(TransportKind::TcpServer, WorkMode::Manual, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Auto, sink, None).await;

        assert!(cli.is_connected());
        cli.stop().await;
        assert_eq!(cli.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn peer_close_closes_channel() {
        let sink = bus();
        let srv = server(TransportKind::TcpServer, WorkMode::Manual, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Manual, sink, None).await;

        cli.stop().await;
        let mut buf = [0u8; 16];
        let first = srv.read(&mut buf).await;
        assert!(matches!(first, Ok(0) | Err(_)));
        assert_eq!(srv.state(), ChannelState::Closed);

        assert_eq!(srv.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            srv.write(b"late").await.unwrap_err(),
            TransportError::NotConnected(_)
        ));
    }

    #[tokio::test]
    async fn failed_heartbeat_closes_channel_without_data() {
        let sink = bus();
        let srv = server(TransportKind::TcpServer, WorkMode::Manual, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Manual, sink.clone(), None).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.subscribe("srv", move |_, payload| {
            let _ = tx.send(payload.to_vec());
        });

        cli.stop().await;
        drop(cli);
        // The closed peer answers this with a reset, so the next heartbeat fails.
        srv.write(b"late").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut buf = [0u8; 16];
        let err = srv.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert_eq!(srv.state(), ChannelState::Closed);
        assert!(rx.try_recv().is_err());
        assert_eq!(srv.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_stalled_write() {
        let srv = Arc::new(server(TransportKind::TcpServer, WorkMode::Manual, bus()));
        let (opened, peer) = tokio::join!(srv.init(), async {
            let addr = bound(&srv).await;
            TcpStream::connect(addr).await.unwrap()
        });
        opened.unwrap();

        // The peer never reads, so this fills both socket buffers and parks.
        let blocked = {
            let srv = Arc::clone(&srv);
            tokio::spawn(async move { srv.write(&vec![0u8; 64 * 1024 * 1024]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(WAIT, srv.stop())
            .await
            .expect("stop should not wait for a stalled write");
        let written = tokio::time::timeout(WAIT, blocked)
            .await
            .expect("the stalled write should be abandoned")
            .unwrap();
        assert!(matches!(written, Err(TransportError::NotConnected(_))));
        assert_eq!(srv.state(), ChannelState::Closed);
        drop(peer);
    }

    #[tokio::test]
    async fn auto_loop_exits_when_peer_goes_away() {
        let sink = bus();
        let srv = server(TransportKind::TcpServer, WorkMode::Auto, sink.clone());
        let cli = connect_pair(&srv, TransportKind::TcpClient, WorkMode::Manual, sink, None).await;

        cli.stop().await;
        tokio::time::timeout(WAIT, async {
            while srv.state() != ChannelState::Closed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listen loop should close the channel");
    }

    #[tokio::test]
    async fn stop_while_waiting_for_peer() {
        let srv = Arc::new(server(TransportKind::TcpServer, WorkMode::Manual, bus()));
        let waiting = {
            let srv = Arc::clone(&srv);
            tokio::spawn(async move { srv.init().await })
        };
        bound(&srv).await;

        srv.stop().await;
        srv.stop().await;

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
        assert_eq!(srv.state(), ChannelState::Closed);

        let again = srv.init().await.unwrap_err();
        assert!(matches!(
            again,
            TransportError::InvalidState {
                state: ChannelState::Closed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn udp_server_adopts_first_sender() {
        let sink = bus();
        let srv = server(TransportKind::UdpServer, WorkMode::Manual, sink.clone());
        let cli = connect_pair(
            &srv,
            TransportKind::UdpClient,
            WorkMode::Manual,
            sink,
            Some(b"dgram"),
        )
        .await;

        let mut buf = [0u8; 64];
        let n = srv.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"dgram");

        let n = cli.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &HEARTBEAT);

        srv.stop().await;
        cli.stop().await;
    }

    #[tokio::test]
    async fn connect_refused_closes_client() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cli = NetworkChannel::with_addr(
            "cli",
            addr,
            TransportKind::TcpClient,
            WorkMode::Manual,
            bus(),
        )
        .unwrap();
        let err = cli.init().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(cli.state(), ChannelState::Closed);
    }
}
