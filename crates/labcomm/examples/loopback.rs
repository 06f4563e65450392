//! Loopback demo: a TCP server in auto mode, a manual client, and a serial
//! channel driven through an in-memory link.
//!
//! Run with: `cargo run -p labcomm --example loopback`

use std::sync::Arc;
use std::time::Duration;

use labcomm::frame::encode;
use labcomm::registry::ChannelRegistry;
use labcomm::transport::{EventBus, TransportKind, WorkMode, ANY_TOPIC};
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(EventBus::new());
    bus.subscribe(ANY_TOPIC, |topic, payload| {
        println!("[{topic}] {payload:02X?}");
    });

    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

    let mut registry = ChannelRegistry::new(bus);
    registry.create("tracker", "127.0.0.1", port, TransportKind::TcpServer, WorkMode::Auto)?;
    registry.create("stimulus", "127.0.0.1", port, TransportKind::TcpClient, WorkMode::Manual)?;
    registry.add_serial("pump", "loopback", 9600)?;

    let (server, client) = tokio::join!(registry.init("tracker"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.init("stimulus").await
    });
    server?;
    client?;

    registry.write_line("stimulus", "trial 1 start").await?;
    println!("client read: {:?}", registry.read_line("stimulus").await?);

    let (link, mut device) = tokio::io::duplex(256);
    registry.serial("pump")?.attach(link).await;
    device.write_all(&encode(&[0x01, 0x10, 0x20])?).await?;
    while registry.listen_msg("pump").await?.is_none() {}
    registry.send_msg("pump", &[0x02, 0x00]).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.clear().await;
    Ok(())
}
