//! Network and serial device communication for experiment control.
//!
//! labcomm connects experiment software to lab hardware: TCP and UDP
//! channels with a heartbeat-driven receive loop, framed serial links with
//! CRC16 integrity checks, and a name-keyed registry that publishes
//! everything received to an event sink.
//!
//! # Crate Structure
//!
//! - [`frame`] - Serial frame codec (`0x59 0x49`, length, payload, CRC16)
//! - [`transport`] - Network and serial channels, event sinks
//! - [`registry`] - Name-keyed channel registry (behind `registry` feature)

/// Re-export frame types.
pub mod frame {
    pub use labcomm_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use labcomm_transport::*;
}

/// Re-export registry types (requires `registry` feature).
#[cfg(feature = "registry")]
pub mod registry {
    pub use labcomm_registry::*;
}
