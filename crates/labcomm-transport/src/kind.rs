use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// The endpoint variant a channel owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    TcpServer,
    TcpClient,
    UdpServer,
    UdpClient,
    Serial,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TcpServer => "tcp_server",
            Self::TcpClient => "tcp_client",
            Self::UdpServer => "udp_server",
            Self::UdpClient => "udp_client",
            Self::Serial => "serial",
        }
    }

    /// TCP or UDP, server or client.
    pub fn is_network(self) -> bool {
        !matches!(self, Self::Serial)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Self::TcpServer | Self::UdpServer)
    }

    pub fn is_tcp(self) -> bool {
        matches!(self, Self::TcpServer | Self::TcpClient)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    /// Accepts `tcp_server`, `tcp-server` and `TcpServer` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "tcpserver" => Ok(Self::TcpServer),
            "tcpclient" => Ok(Self::TcpClient),
            "udpserver" => Ok(Self::UdpServer),
            "udpclient" => Ok(Self::UdpClient),
            "serial" => Ok(Self::Serial),
            _ => Err(TransportError::InvalidKind(s.to_string())),
        }
    }
}

/// Who drives reception on an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    /// The caller reads explicitly.
    Manual,
    /// The channel runs its own listen loop and publishes to the event sink.
    #[default]
    Auto,
}

/// Connection lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Unopened = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unopened,
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unopened => "unopened",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        })
    }
}

/// Lock-free holder for a [`ChannelState`] shared with a listen task.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn swap(&self, state: ChannelState) -> ChannelState {
        ChannelState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move from `from` to `to`; returns the observed state on failure.
    pub(crate) fn transition(
        &self,
        from: ChannelState,
        to: ChannelState,
    ) -> Result<(), ChannelState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ChannelState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_common_spellings() {
        assert_eq!("tcp_server".parse::<TransportKind>().unwrap(), TransportKind::TcpServer);
        assert_eq!("TcpClient".parse::<TransportKind>().unwrap(), TransportKind::TcpClient);
        assert_eq!("udp-server".parse::<TransportKind>().unwrap(), TransportKind::UdpServer);
        assert_eq!("SERIAL".parse::<TransportKind>().unwrap(), TransportKind::Serial);
    }

    #[test]
    fn unknown_kind_is_invalid_kind() {
        let err = "carrier_pigeon".parse::<TransportKind>().unwrap_err();
        assert!(matches!(err, TransportError::InvalidKind(ref k) if k == "carrier_pigeon"));
    }

    #[test]
    fn kind_display_roundtrips() {
        for kind in [
            TransportKind::TcpServer,
            TransportKind::TcpClient,
            TransportKind::UdpServer,
            TransportKind::UdpClient,
            TransportKind::Serial,
        ] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
    }

    #[test]
    fn kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&TransportKind::UdpClient).unwrap();
        assert_eq!(json, "\"udp_client\"");
        let mode: WorkMode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(mode, WorkMode::Manual);
    }

    #[test]
    fn state_cell_transitions() {
        let cell = StateCell::new(ChannelState::Unopened);
        assert!(cell.transition(ChannelState::Unopened, ChannelState::Connecting).is_ok());
        assert_eq!(
            cell.transition(ChannelState::Unopened, ChannelState::Connecting),
            Err(ChannelState::Connecting)
        );
        assert_eq!(cell.swap(ChannelState::Closed), ChannelState::Connecting);
        cell.set(ChannelState::Closed);
        assert_eq!(cell.get(), ChannelState::Closed);
    }
}
