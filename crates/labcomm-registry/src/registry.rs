use std::collections::BTreeMap;
use std::sync::Arc;

use labcomm_frame::Frame;
use labcomm_transport::{
    ChannelState, EventBus, EventSink, NetworkChannel, SerialChannel, SerialConfig,
    TransportError, TransportKind, WorkMode,
};
use tracing::{debug, info};

use crate::config::{ChannelConfig, RegistryConfig};
use crate::error::{RegistryError, Result};

/// A registered channel.
pub enum Channel {
    Network(NetworkChannel),
    Serial(SerialChannel),
}

impl Channel {
    pub fn name(&self) -> &str {
        match self {
            Self::Network(ch) => ch.name(),
            Self::Serial(ch) => ch.name(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Network(ch) => ch.kind(),
            Self::Serial(_) => TransportKind::Serial,
        }
    }

    pub fn state(&self) -> ChannelState {
        match self {
            Self::Network(ch) => ch.state(),
            Self::Serial(ch) => ch.state(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }
}

/// Name-keyed collection of network and serial channels.
///
/// Structural changes take `&mut self`; channel operations take `&self`,
/// so different channels can be driven concurrently through a shared
/// reference (for example `tokio::join!` on a server and a client).
pub struct ChannelRegistry {
    channels: BTreeMap<String, Channel>,
    sink: Arc<dyn EventSink>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(Arc::new(EventBus::new()))
    }
}

impl ChannelRegistry {
    /// Create an empty registry publishing to `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            channels: BTreeMap::new(),
            sink,
        }
    }

    /// Build every channel described by `config`. Nothing is opened.
    pub fn from_config(config: &RegistryConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::new(sink);
        for channel in &config.channels {
            match channel {
                ChannelConfig::Network {
                    name,
                    host,
                    port,
                    kind,
                    mode,
                } => registry.create(name, host, *port, *kind, *mode)?,
                ChannelConfig::Serial { name, config } => {
                    registry.add_serial_with_config(name, config.clone())?
                }
            }
        }
        info!(channels = registry.len(), "registry built from configuration");
        Ok(registry)
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Register a network channel. `host` must be an IP literal.
    pub fn create(
        &mut self,
        name: &str,
        host: &str,
        port: u16,
        kind: TransportKind,
        mode: WorkMode,
    ) -> Result<()> {
        self.ensure_free(name)?;
        let channel = NetworkChannel::new(name, host, port, kind, mode, Arc::clone(&self.sink))?;
        debug!(channel = name, kind = %kind, host, port, mode = ?mode, "channel created");
        self.channels
            .insert(name.to_string(), Channel::Network(channel));
        Ok(())
    }

    /// Register a serial channel with default line settings.
    pub fn add_serial(&mut self, name: &str, port_name: &str, baud_rate: u32) -> Result<()> {
        self.add_serial_with_config(name, SerialConfig::new(port_name, baud_rate))
    }

    pub fn add_serial_with_config(&mut self, name: &str, config: SerialConfig) -> Result<()> {
        self.ensure_free(name)?;
        debug!(channel = name, port = %config.port_name, baud_rate = config.baud_rate, "serial channel added");
        let channel = SerialChannel::new(name, config, Arc::clone(&self.sink));
        self.channels
            .insert(name.to_string(), Channel::Serial(channel));
        Ok(())
    }

    /// Replace a serial channel's configuration, reapplying it if open.
    pub async fn set_serial(&self, name: &str, config: SerialConfig) -> Result<()> {
        self.serial(name)?.set_config(config).await?;
        Ok(())
    }

    /// Open a channel: connect or accept for network channels, open the port
    /// for serial ones. May suspend until a peer shows up.
    pub async fn init(&self, name: &str) -> Result<()> {
        match self.channel(name)? {
            Channel::Network(ch) => ch.init().await?,
            Channel::Serial(ch) => ch.open().await?,
        }
        Ok(())
    }

    /// Same as [`init`](ChannelRegistry::init).
    pub async fn open(&self, name: &str) -> Result<()> {
        self.init(name).await
    }

    /// Whether `name` exists and is connected or open.
    pub fn check_connect(&self, name: &str) -> bool {
        self.channels
            .get(name)
            .is_some_and(Channel::is_connected)
    }

    pub async fn read(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        let n = match self.channel(name)? {
            Channel::Network(ch) => ch.read(buf).await?,
            Channel::Serial(ch) => ch.read(buf).await?,
        };
        Ok(n)
    }

    pub async fn read_line(&self, name: &str) -> Result<String> {
        let line = match self.channel(name)? {
            Channel::Network(ch) => ch.read_line().await?,
            Channel::Serial(ch) => ch.read_line().await?,
        };
        Ok(line)
    }

    pub async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        match self.channel(name)? {
            Channel::Network(ch) => ch.write(data).await?,
            Channel::Serial(ch) => ch.write(data).await?,
        }
        Ok(())
    }

    pub async fn write_line(&self, name: &str, msg: &str) -> Result<()> {
        match self.channel(name)? {
            Channel::Network(ch) => ch.write_line(msg).await?,
            Channel::Serial(ch) => ch.write_line(msg).await?,
        }
        Ok(())
    }

    /// Release the channel's socket or port. The name stays registered.
    pub async fn stop(&self, name: &str) -> Result<()> {
        match self.channel(name)? {
            Channel::Network(ch) => ch.stop().await,
            Channel::Serial(ch) => ch.close().await,
        }
        Ok(())
    }

    /// Same as [`stop`](ChannelRegistry::stop).
    pub async fn close(&self, name: &str) -> Result<()> {
        self.stop(name).await
    }

    /// Stop a channel and free its name.
    pub async fn remove(&mut self, name: &str) -> Result<()> {
        self.stop(name).await?;
        self.channels.remove(name);
        debug!(channel = name, "channel removed");
        Ok(())
    }

    /// Stop and remove every channel.
    pub async fn clear(&mut self) {
        for (name, channel) in std::mem::take(&mut self.channels) {
            match channel {
                Channel::Network(ch) => ch.stop().await,
                Channel::Serial(ch) => ch.close().await,
            }
            debug!(channel = %name, "channel removed");
        }
        info!("registry cleared");
    }

    pub async fn enable_dtr(&self, name: &str, level: bool) -> Result<()> {
        self.serial(name)?.enable_dtr(level).await?;
        Ok(())
    }

    pub async fn enable_rts(&self, name: &str, level: bool) -> Result<()> {
        self.serial(name)?.enable_rts(level).await?;
        Ok(())
    }

    /// Frame `payload` and write it to a serial channel.
    pub async fn send_msg(&self, name: &str, payload: &[u8]) -> Result<()> {
        self.serial(name)?.send_msg(payload).await?;
        Ok(())
    }

    /// One decode step on a serial channel.
    pub async fn listen_msg(&self, name: &str) -> Result<Option<Frame>> {
        Ok(self.serial(name)?.listen_msg().await?)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn state(&self, name: &str) -> Result<ChannelState> {
        Ok(self.channel(name)?.state())
    }

    pub fn kind(&self, name: &str) -> Result<TransportKind> {
        Ok(self.channel(name)?.kind())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, name: &str) -> Result<&Channel> {
        self.channels
            .get(name)
            .ok_or_else(|| RegistryError::NameNotFound(name.to_string()))
    }

    /// The network channel registered as `name`.
    pub fn network(&self, name: &str) -> Result<&NetworkChannel> {
        match self.channel(name)? {
            Channel::Network(ch) => Ok(ch),
            Channel::Serial(_) => Err(kind_mismatch(TransportKind::Serial)),
        }
    }

    /// The serial channel registered as `name`.
    pub fn serial(&self, name: &str) -> Result<&SerialChannel> {
        match self.channel(name)? {
            Channel::Serial(ch) => Ok(ch),
            Channel::Network(ch) => Err(kind_mismatch(ch.kind())),
        }
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.channels.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}

fn kind_mismatch(kind: TransportKind) -> RegistryError {
    TransportError::InvalidKind(kind.to_string()).into()
}
