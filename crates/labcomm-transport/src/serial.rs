//! Serial channel: raw line I/O plus CRC16-framed messages.
//!
//! The port is opened through `tokio-serial`. Any [`SerialLink`] can stand in
//! for the hardware, which is how tests and simulations drive the channel.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::task::{Context, Poll};

use labcomm_frame::{write_frame, DecodeState, Frame, FrameError, FrameReader};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::events::EventSink;
use crate::kind::{ChannelState, StateCell};
use crate::network::LISTEN_BUFFER_SIZE;

/// Serial port configuration.
///
/// Defaults: 9600 baud, 8 data bits, 1 stop bit, no parity, no flow
/// control, DTR and RTS de-asserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// OS port name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Data Terminal Ready level applied on open.
    pub dtr: bool,
    /// Request To Send level applied on open.
    pub rts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            dtr: false,
            rts: false,
        }
    }
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "serial port name is empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfig(format!(
                "baud rate for {} must be non-zero",
                self.port_name
            )));
        }
        Ok(())
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// A byte link with serial line controls.
pub trait SerialLink: AsyncRead + AsyncWrite + Send + Unpin {
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    fn set_rts(&mut self, level: bool) -> io::Result<()>;

    /// Reapply line settings to an open link.
    fn apply(&mut self, config: &SerialConfig) -> io::Result<()>;
}

impl SerialLink for SerialStream {
    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.write_data_terminal_ready(level).map_err(io::Error::from)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.write_request_to_send(level).map_err(io::Error::from)
    }

    fn apply(&mut self, config: &SerialConfig) -> io::Result<()> {
        self.set_baud_rate(config.baud_rate)?;
        self.set_data_bits(config.data_bits.into())?;
        self.set_stop_bits(config.stop_bits.into())?;
        self.set_parity(config.parity.into())?;
        self.set_flow_control(config.flow_control.into())?;
        Ok(())
    }
}

/// In-memory link; line controls are accepted and ignored.
impl SerialLink for DuplexStream {
    fn set_dtr(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }

    fn apply(&mut self, _config: &SerialConfig) -> io::Result<()> {
        Ok(())
    }
}

/// One link shared by the frame reader, the writer and the line controls.
///
/// Each side locks the link only for the duration of a single poll, so a
/// read parked on an idle port never holds off a write.
#[derive(Clone)]
struct SharedLink(Arc<StdMutex<Box<dyn SerialLink>>>);

impl SharedLink {
    fn new(link: Box<dyn SerialLink>) -> Self {
        Self(Arc::new(StdMutex::new(link)))
    }

    fn with<R>(&self, f: impl FnOnce(&mut (dyn SerialLink + 'static)) -> R) -> R {
        let mut link = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(link.as_mut())
    }
}

impl AsyncRead for SharedLink {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.with(|link| Pin::new(link).poll_read(cx, buf))
    }
}

impl AsyncWrite for SharedLink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.with(|link| Pin::new(link).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with(|link| Pin::new(link).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with(|link| Pin::new(link).poll_shutdown(cx))
    }
}

/// A named serial port.
///
/// Decode steps and raw reads go through the reader lock, framed and raw
/// writes through the writer lock, and line controls touch the link
/// directly. A pending [`listen_msg`](SerialChannel::listen_msg) therefore
/// never blocks a send. [`close`](SerialChannel::close) interrupts pending
/// reads and writes.
pub struct SerialChannel {
    name: String,
    config: StdMutex<SerialConfig>,
    sink: Arc<dyn EventSink>,
    state: StateCell,
    cancel: StdMutex<CancellationToken>,
    reader: Mutex<Option<FrameReader<SharedLink>>>,
    writer: Mutex<Option<SharedLink>>,
    control: StdMutex<Option<SharedLink>>,
}

impl SerialChannel {
    pub fn new(name: impl Into<String>, config: SerialConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            name: name.into(),
            config: StdMutex::new(config),
            sink,
            state: StateCell::new(ChannelState::Unopened),
            cancel: StdMutex::new(CancellationToken::new()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            control: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> SerialConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Decoder position, if the port is open and no step is in flight.
    pub fn decode_state(&self) -> Option<DecodeState> {
        self.reader
            .try_lock()
            .ok()
            .and_then(|reader| reader.as_ref().map(FrameReader::state))
    }

    fn control_link(&self) -> Option<SharedLink> {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn not_connected(&self) -> TransportError {
        TransportError::NotConnected(self.name.clone())
    }

    /// Open the configured port. Opening an open port is a no-op.
    pub async fn open(&self) -> Result<()> {
        if self.control_link().is_some() {
            debug!(channel = %self.name, "serial port already open");
            return Ok(());
        }
        let config = self.config();
        config.validate()?;

        debug!(
            channel = %self.name,
            port = %config.port_name,
            baud_rate = config.baud_rate,
            data_bits = ?config.data_bits,
            stop_bits = ?config.stop_bits,
            parity = ?config.parity,
            flow_control = ?config.flow_control,
            "opening serial port"
        );
        let stream = tokio_serial::new(&config.port_name, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|source| TransportError::Serial {
                port: config.port_name.clone(),
                source,
            })?;

        self.install(Box::new(stream), &config).await;
        info!(channel = %self.name, port = %config.port_name, baud_rate = config.baud_rate, "serial port opened");
        Ok(())
    }

    /// Use `link` as the port, replacing any open one.
    pub async fn attach(&self, link: impl SerialLink + 'static) {
        let config = self.config();
        self.install(Box::new(link), &config).await;
        debug!(channel = %self.name, "serial link attached");
    }

    async fn install(&self, mut link: Box<dyn SerialLink>, config: &SerialConfig) {
        if let Err(err) = link.set_dtr(config.dtr) {
            warn!(channel = %self.name, error = %err, "failed to set DTR");
        }
        if let Err(err) = link.set_rts(config.rts) {
            warn!(channel = %self.name, error = %err, "failed to set RTS");
        }
        // Wake anything still parked on a replaced link.
        self.token().cancel();

        let link = SharedLink::new(link);
        *self.reader.lock().await = Some(FrameReader::new(link.clone()));
        *self.writer.lock().await = Some(link.clone());
        *self.control.lock().unwrap_or_else(PoisonError::into_inner) = Some(link);
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.state.set(ChannelState::Connected);
    }

    /// Replace the configuration, reapplying it if the port is open.
    pub async fn set_config(&self, config: SerialConfig) -> Result<()> {
        config.validate()?;
        if let Some(link) = self.control_link() {
            link.with(|link| {
                link.apply(&config)?;
                link.set_dtr(config.dtr)?;
                link.set_rts(config.rts)
            })?;
        }
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        debug!(channel = %self.name, "serial configuration updated");
        Ok(())
    }

    pub async fn enable_dtr(&self, level: bool) -> Result<()> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).dtr = level;
        if let Some(link) = self.control_link() {
            link.with(|link| link.set_dtr(level))?;
        }
        debug!(channel = %self.name, level, "DTR");
        Ok(())
    }

    pub async fn enable_rts(&self, level: bool) -> Result<()> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).rts = level;
        if let Some(link) = self.control_link() {
            link.with(|link| link.set_rts(level))?;
        }
        debug!(channel = %self.name, level, "RTS");
        Ok(())
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw, unframed read straight from the port.
    ///
    /// Bytes the frame decoder is holding for a resync are not returned.
    /// End of stream closes the channel and returns 0, as does a close while
    /// the read is pending.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let token = self.token();
        let n = tokio::select! {
            _ = token.cancelled() => return Ok(0),
            read = async {
                let mut reader = self.reader.lock().await;
                let reader = reader.as_mut().ok_or_else(|| self.not_connected())?;
                Ok::<_, TransportError>(reader.get_mut().read(buf).await?)
            } => read?,
        };
        if n == 0 && !buf.is_empty() {
            info!(channel = %self.name, "serial link reached end of stream");
            self.close().await;
            return Ok(0);
        }
        trace!(channel = %self.name, bytes = n, data = ?&buf[..n], "serial read");
        Ok(n)
    }

    /// Read once into a 1024-byte buffer and decode the received bytes as UTF-8.
    pub async fn read_line(&self) -> Result<String> {
        let mut buf = [0u8; LISTEN_BUFFER_SIZE];
        let n = self.read(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Raw, unframed write of the whole buffer.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let token = self.token();
        tokio::select! {
            _ = token.cancelled() => return Err(self.not_connected()),
            written = async {
                let mut writer = self.writer.lock().await;
                let link = writer.as_mut().ok_or_else(|| self.not_connected())?;
                link.write_all(data).await?;
                link.flush().await?;
                Ok::<_, TransportError>(())
            } => written?,
        }
        trace!(channel = %self.name, bytes = data.len(), data = ?data, "serial write");
        Ok(())
    }

    pub async fn write_line(&self, msg: &str) -> Result<()> {
        self.write(msg.as_bytes()).await
    }

    /// Frame `payload` and write it in one go.
    pub async fn send_msg(&self, payload: &[u8]) -> Result<()> {
        let token = self.token();
        tokio::select! {
            _ = token.cancelled() => return Err(self.not_connected()),
            sent = async {
                let mut writer = self.writer.lock().await;
                let link = writer.as_mut().ok_or_else(|| self.not_connected())?;
                write_frame(link, payload).await?;
                Ok::<_, TransportError>(())
            } => sent?,
        }
        debug!(channel = %self.name, bytes = payload.len(), tag = ?payload.first(), "frame sent");
        Ok(())
    }

    /// Advance the decoder by one state transition.
    ///
    /// A completed frame is published under its topic and also returned.
    /// Waits while the port has no bytes; returns `Ok(None)` if the port is
    /// closed meanwhile.
    pub async fn listen_msg(&self) -> Result<Option<Frame>> {
        let token = self.token();
        let stepped = tokio::select! {
            _ = token.cancelled() => return Ok(None),
            stepped = async {
                let mut reader = self.reader.lock().await;
                let reader = reader.as_mut().ok_or_else(|| self.not_connected())?;
                Ok::<_, TransportError>(reader.listen_step().await)
            } => stepped?,
        };

        match stepped {
            Ok(Some(frame)) => {
                let topic = frame.topic(&self.name);
                debug!(channel = %self.name, topic = %topic, bytes = frame.payload.len(), "frame received");
                self.sink.publish(&topic, &frame.payload);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(FrameError::ConnectionClosed) => {
                info!(channel = %self.name, "serial link reached end of stream");
                self.close().await;
                Err(FrameError::ConnectionClosed.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Release the port. Idempotent.
    pub async fn close(&self) {
        self.token().cancel();
        let previous = self.state.swap(ChannelState::Closed);
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.writer.lock().await.take();
        self.reader.lock().await.take();
        if previous == ChannelState::Connected {
            info!(channel = %self.name, "serial port closed");
        }
    }
}
