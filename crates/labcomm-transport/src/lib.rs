//! Channel transports for lab hardware and peer processes.
//!
//! Provides the endpoint types a channel registry manages:
//! - [`NetworkChannel`]: TCP/UDP, server or client, with heartbeat-gated
//!   reads and an optional listen loop
//! - [`SerialChannel`]: a serial port carrying raw lines or CRC16 frames
//!
//! Both publish inbound data to an [`EventSink`]; [`EventBus`] is the
//! in-process implementation.

pub mod error;
pub mod events;
pub mod kind;
pub mod network;
pub mod serial;

pub use error::{Result, TransportError};
pub use events::{EventBus, EventSink, Handler, SubscriptionId, ANY_TOPIC};
pub use kind::{ChannelState, TransportKind, WorkMode};
pub use network::{NetworkChannel, HEARTBEAT, LISTEN_BACKLOG, LISTEN_BUFFER_SIZE};
pub use serial::{
    DataBits, FlowControl, Parity, SerialChannel, SerialConfig, SerialLink, StopBits,
};
