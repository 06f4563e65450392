use std::net::SocketAddr;

use crate::kind::ChannelState;

/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport kind is unknown or not valid for this operation.
    #[error("invalid transport kind: {0}")]
    InvalidKind(String),

    /// The host is not an IP literal.
    #[error("invalid address {host:?}: {source}")]
    InvalidAddress {
        host: String,
        source: std::net::AddrParseError,
    },

    /// Serial configuration is incomplete or out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The channel cannot be opened from its current state.
    #[error("channel {name} cannot be opened while {state}")]
    InvalidState { name: String, state: ChannelState },

    /// The channel has no open link.
    #[error("channel {0} is not connected")]
    NotConnected(String),

    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection or first datagram.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The serial port could not be opened or configured.
    #[error("serial port {port}: {source}")]
    Serial {
        port: String,
        source: tokio_serial::Error,
    },

    /// An I/O error occurred on an open link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] labcomm_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
