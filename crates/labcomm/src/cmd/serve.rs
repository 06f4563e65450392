use std::sync::Arc;

use labcomm_registry::ChannelRegistry;
use labcomm_transport::{EventBus, WorkMode};
use tracing::info;

use crate::cmd::{pump_events, subscribe_all, ServeArgs};
use crate::exit::{registry_error, CliResult, SUCCESS};
use crate::output::OutputFormat;
use crate::shutdown::wait_for_shutdown;

const CHANNEL: &str = "serve";

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let bus = Arc::new(EventBus::new());
    let mut events = subscribe_all(&bus);
    let mut registry = ChannelRegistry::new(bus);
    registry
        .create(CHANNEL, &args.host, args.port, args.kind.server(), WorkMode::Auto)
        .map_err(|err| registry_error("invalid server address", err))?;

    info!(host = %args.host, port = args.port, kind = ?args.kind, "waiting for a peer");
    tokio::select! {
        opened = registry.init(CHANNEL) => {
            opened.map_err(|err| registry_error("failed to open server", err))?;
        }
        _ = wait_for_shutdown() => {
            registry.clear().await;
            return Ok(SUCCESS);
        }
    }
    info!("peer connected");

    let printed = pump_events(&registry, &mut events, args.count, format).await;
    info!(events = printed, "server stopped");
    registry.clear().await;
    Ok(SUCCESS)
}
