use std::sync::Arc;

use labcomm_frame::encode;
use labcomm_registry::ChannelRegistry;
use labcomm_transport::EventBus;
use tracing::info;

use crate::cmd::SerialSendArgs;
use crate::exit::{frame_error, registry_error, CliResult, SUCCESS};
use crate::output::{print_crc, CrcReport, OutputFormat};

const CHANNEL: &str = "serial";

pub async fn run(args: SerialSendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = args.payload.resolve()?;
    let wire = encode(&payload).map_err(|err| frame_error("invalid payload", err))?;

    let mut registry = ChannelRegistry::new(Arc::new(EventBus::new()));
    registry
        .add_serial_with_config(CHANNEL, args.line.config())
        .map_err(|err| registry_error("invalid serial settings", err))?;
    registry
        .open(CHANNEL)
        .await
        .map_err(|err| registry_error("failed to open serial port", err))?;

    let sent = registry.send_msg(CHANNEL, &payload).await;
    registry.clear().await;
    sent.map_err(|err| registry_error("failed to send frame", err))?;
    info!(port = %args.line.port, bytes = wire.len(), "frame sent");

    let report = CrcReport::new(&payload, Some(&wire));
    print_crc(&report, Some(&wire), format);
    Ok(SUCCESS)
}
