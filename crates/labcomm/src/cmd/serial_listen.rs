use std::sync::Arc;

use labcomm_frame::FrameError;
use labcomm_registry::{ChannelRegistry, RegistryError};
use labcomm_transport::{EventBus, TransportError};
use tracing::info;

use crate::cmd::SerialListenArgs;
use crate::exit::{registry_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};
use crate::shutdown::wait_for_shutdown;

const CHANNEL: &str = "serial";

pub async fn run(args: SerialListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut registry = ChannelRegistry::new(Arc::new(EventBus::new()));
    registry
        .add_serial_with_config(CHANNEL, args.line.config())
        .map_err(|err| registry_error("invalid serial settings", err))?;
    registry
        .open(CHANNEL)
        .await
        .map_err(|err| registry_error("failed to open serial port", err))?;
    info!(port = %args.line.port, baud = args.line.baud, "listening for frames");

    let result = listen(&registry, args.count, format).await;
    registry.clear().await;
    result.map(|printed| {
        info!(frames = printed, "listener stopped");
        SUCCESS
    })
}

async fn listen(
    registry: &ChannelRegistry,
    count: Option<usize>,
    format: OutputFormat,
) -> CliResult<usize> {
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    let mut printed = 0;

    while count.is_none_or(|limit| printed < limit) {
        let stepped = tokio::select! {
            stepped = registry.listen_msg(CHANNEL) => stepped,
            _ = &mut shutdown => break,
        };
        match stepped {
            Ok(Some(frame)) => {
                print_frame(CHANNEL, &frame, format);
                printed += 1;
            }
            Ok(None) if !registry.check_connect(CHANNEL) => {
                info!("serial port closed");
                break;
            }
            Ok(None) => {}
            Err(RegistryError::Transport(TransportError::Frame(FrameError::ConnectionClosed))) => {
                info!("serial link reached end of stream");
                break;
            }
            Err(err) => return Err(registry_error("serial receive failed", err)),
        }
    }
    Ok(printed)
}
