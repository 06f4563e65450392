//! Name-keyed registry of communication channels.
//!
//! This is the surface experiment code talks to. Create named network or
//! serial channels, open them, then read, write and exchange frames by
//! name; inbound data is published to the registry's event sink.

pub mod config;
pub mod error;
pub mod registry;

pub use config::{ChannelConfig, RegistryConfig};
pub use error::{RegistryError, Result};
pub use registry::{Channel, ChannelRegistry};
