use std::sync::Arc;

use labcomm_registry::ChannelRegistry;
use labcomm_transport::{EventBus, WorkMode, LISTEN_BUFFER_SIZE};
use tracing::{debug, info};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{registry_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat};

const CHANNEL: &str = "send";

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let mut payload = args.payload.resolve()?;
    if args.newline {
        payload.push(b'\n');
    }
    let wait_timeout = parse_duration(&args.wait_timeout)?;

    let mut registry = ChannelRegistry::new(Arc::new(EventBus::new()));
    registry
        .create(CHANNEL, &args.host, args.port, args.kind.client(), WorkMode::Manual)
        .map_err(|err| registry_error("invalid server address", err))?;
    registry
        .init(CHANNEL)
        .await
        .map_err(|err| registry_error("failed to connect", err))?;

    let result = exchange(&registry, &payload, args.wait.then_some(wait_timeout), format).await;
    registry.clear().await;
    result
}

async fn exchange(
    registry: &ChannelRegistry,
    payload: &[u8],
    wait: Option<std::time::Duration>,
    format: OutputFormat,
) -> CliResult<i32> {
    registry
        .write(CHANNEL, payload)
        .await
        .map_err(|err| registry_error("failed to send", err))?;
    info!(bytes = payload.len(), "payload sent");

    let Some(wait) = wait else {
        return Ok(SUCCESS);
    };

    let mut buf = vec![0u8; LISTEN_BUFFER_SIZE];
    let n = tokio::time::timeout(wait, registry.read(CHANNEL, &mut buf))
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("no response within {wait:?}")))?
        .map_err(|err| registry_error("failed to read response", err))?;
    if n == 0 && !registry.check_connect(CHANNEL) {
        return Err(CliError::new(FAILURE, "connection closed before a response arrived"));
    }
    debug!(bytes = n, "response received");
    print_event(CHANNEL, &buf[..n], format);
    Ok(SUCCESS)
}
