use std::sync::Arc;

use labcomm_registry::{ChannelConfig, ChannelRegistry, RegistryConfig};
use labcomm_transport::EventBus;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cmd::{pump_events, subscribe_all, RunArgs};
use crate::exit::{registry_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = RegistryConfig::from_file(&args.config)
        .map_err(|err| registry_error("failed to load config", err))?;
    if config.channels.is_empty() {
        warn!(config = %args.config.display(), "no channels configured");
        return Ok(SUCCESS);
    }

    let bus = Arc::new(EventBus::new());
    let mut events = subscribe_all(&bus);
    let registry = Arc::new(
        ChannelRegistry::from_config(&config, bus)
            .map_err(|err| registry_error("invalid config", err))?,
    );
    info!(channels = registry.len(), "registry loaded");

    let mut tasks = JoinSet::new();
    for channel in &config.channels {
        let registry = Arc::clone(&registry);
        let name = channel.name().to_string();
        match channel {
            ChannelConfig::Network { .. } => {
                tasks.spawn(open_network(registry, name));
            }
            ChannelConfig::Serial { .. } => {
                tasks.spawn(listen_serial(registry, name));
            }
        }
    }

    let printed = pump_events(&registry, &mut events, args.count, format).await;
    info!(events = printed, "stopping channels");

    for name in registry.names() {
        if let Err(err) = registry.stop(name).await {
            warn!(channel = name, error = %err, "failed to stop channel");
        }
    }
    tasks.shutdown().await;
    Ok(SUCCESS)
}

async fn open_network(registry: Arc<ChannelRegistry>, name: String) {
    match registry.init(&name).await {
        Ok(()) => debug!(channel = %name, "channel opened"),
        Err(err) => warn!(channel = %name, error = %err, "failed to open channel"),
    }
}

/// Open the port and decode frames until it closes; frames are published
/// to the registry's sink as they arrive.
async fn listen_serial(registry: Arc<ChannelRegistry>, name: String) {
    if let Err(err) = registry.open(&name).await {
        warn!(channel = %name, error = %err, "failed to open serial port");
        return;
    }
    loop {
        match registry.listen_msg(&name).await {
            Ok(Some(frame)) => debug!(channel = %name, bytes = frame.payload.len(), "frame received"),
            Ok(None) if !registry.check_connect(&name) => break,
            Ok(None) => {}
            Err(err) => {
                warn!(channel = %name, error = %err, "serial receive failed");
                break;
            }
        }
    }
    debug!(channel = %name, "serial listener stopped");
}
