use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use labcomm_registry::ChannelRegistry;
use labcomm_transport::{
    ChannelState, DataBits, EventBus, FlowControl, Parity, SerialConfig, StopBits, TransportKind,
    ANY_TOPIC,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::{print_event, OutputFormat};
use crate::shutdown::wait_for_shutdown;

pub mod crc;
pub mod run;
pub mod send;
pub mod serial_listen;
pub mod serial_send;
pub mod serve;
pub mod version;

/// How often event loops check whether every channel has gone quiet.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one TCP/UDP peer and print what it sends.
    Serve(ServeArgs),
    /// Connect to a TCP/UDP server and send one payload.
    Send(SendArgs),
    /// Open a serial port and print decoded frames.
    SerialListen(SerialListenArgs),
    /// Send one framed message over a serial port.
    SerialSend(SerialSendArgs),
    /// Compute the CRC16 and frame encoding of a payload.
    Crc(CrcArgs),
    /// Open every channel in a registry config and print received events.
    Run(RunArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::SerialListen(args) => serial_listen::run(args, format).await,
        Command::SerialSend(args) => serial_send::run(args, format).await,
        Command::Crc(args) => crc::run(args, format),
        Command::Run(args) => run::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Network protocol selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum NetKind {
    Tcp,
    Udp,
}

impl NetKind {
    pub fn server(self) -> TransportKind {
        match self {
            NetKind::Tcp => TransportKind::TcpServer,
            NetKind::Udp => TransportKind::UdpServer,
        }
    }

    pub fn client(self) -> TransportKind {
        match self {
            NetKind::Tcp => TransportKind::TcpClient,
            NetKind::Udp => TransportKind::UdpClient,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on.
    pub port: u16,
    /// Protocol.
    #[arg(long, value_enum, default_value = "tcp")]
    pub kind: NetKind,
    /// Local IP address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server port.
    pub port: u16,
    /// Protocol.
    #[arg(long, value_enum, default_value = "tcp")]
    pub kind: NetKind,
    /// Server IP address.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Append a newline to the payload.
    #[arg(long)]
    pub newline: bool,
    /// Wait for one response and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct SerialListenArgs {
    #[command(flatten)]
    pub line: SerialLineArgs,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SerialSendArgs {
    #[command(flatten)]
    pub line: SerialLineArgs,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct CrcArgs {
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Registry configuration file (JSON).
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Payload given as text, hex or a file.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct PayloadArgs {
    /// Text payload.
    #[arg(long)]
    pub data: Option<String>,
    /// Hex payload, e.g. "01 02 0A" or "01020a".
    #[arg(long)]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl PayloadArgs {
    pub fn resolve(&self) -> CliResult<Vec<u8>> {
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(text) = &self.hex {
            return parse_hex(text);
        }
        if let Some(path) = &self.file {
            return std::fs::read(path).map_err(|err| {
                crate::exit::io_error(&format!("failed to read {}", path.display()), err)
            });
        }
        Err(CliError::new(USAGE, "one of --data, --hex or --file is required"))
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ParityArg {
    None,
    Odd,
    Even,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FlowControlArg {
    None,
    Software,
    Hardware,
}

/// Serial port and line settings.
#[derive(Args, Debug)]
pub struct SerialLineArgs {
    /// Port name, e.g. /dev/ttyUSB0 or COM3.
    pub port: String,
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(5..=8))]
    pub data_bits: u8,
    #[arg(long, value_enum, default_value = "1")]
    pub stop_bits: StopBitsArg,
    #[arg(long, value_enum, default_value = "none")]
    pub parity: ParityArg,
    #[arg(long, value_enum, default_value = "none")]
    pub flow_control: FlowControlArg,
    /// Assert DTR after opening.
    #[arg(long)]
    pub dtr: bool,
    /// Assert RTS after opening.
    #[arg(long)]
    pub rts: bool,
}

impl SerialLineArgs {
    pub fn config(&self) -> SerialConfig {
        SerialConfig {
            port_name: self.port.clone(),
            baud_rate: self.baud,
            data_bits: match self.data_bits {
                5 => DataBits::Five,
                6 => DataBits::Six,
                7 => DataBits::Seven,
                _ => DataBits::Eight,
            },
            stop_bits: match self.stop_bits {
                StopBitsArg::One => StopBits::One,
                StopBitsArg::Two => StopBits::Two,
            },
            parity: match self.parity {
                ParityArg::None => Parity::None,
                ParityArg::Odd => Parity::Odd,
                ParityArg::Even => Parity::Even,
            },
            flow_control: match self.flow_control {
                FlowControlArg::None => FlowControl::None,
                FlowControlArg::Software => FlowControl::Software,
                FlowControlArg::Hardware => FlowControl::Hardware,
            },
            dtr: self.dtr,
            rts: self.rts,
        }
    }
}

/// Parse hex bytes, ignoring whitespace, `:` separators and `0x` prefixes.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part)
        })
        .collect();
    hex::decode(&digits).map_err(|err| CliError::new(USAGE, format!("invalid hex payload: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub type Event = (String, Vec<u8>);

/// Forward every event published on `bus` into a channel.
pub fn subscribe_all(bus: &EventBus) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(ANY_TOPIC, move |topic, payload| {
        let _ = tx.send((topic.to_string(), payload.to_vec()));
    });
    rx
}

/// No channel is connecting or connected.
fn is_idle(registry: &ChannelRegistry) -> bool {
    registry.names().all(|name| {
        matches!(
            registry.state(name),
            Ok(ChannelState::Unopened | ChannelState::Closed)
        )
    })
}

/// Print events until `count` is reached, a shutdown signal arrives, or
/// every channel has closed and the queue is drained. Returns the number
/// of events printed.
pub async fn pump_events(
    registry: &ChannelRegistry,
    events: &mut mpsc::UnboundedReceiver<Event>,
    count: Option<usize>,
    format: OutputFormat,
) -> usize {
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    let mut idle_check = tokio::time::interval_at(
        tokio::time::Instant::now() + IDLE_CHECK_INTERVAL,
        IDLE_CHECK_INTERVAL,
    );
    let mut printed = 0;

    if count == Some(0) {
        return printed;
    }

    loop {
        tokio::select! {
            Some((topic, payload)) = events.recv() => {
                print_event(&topic, &payload, format);
                printed += 1;
                if count.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = idle_check.tick() => {
                if events.is_empty() && is_idle(registry) {
                    info!("all channels closed");
                    break;
                }
            }
        }
    }
    printed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn parse_hex_accepts_common_spellings() {
        assert_eq!(parse_hex("59 49 00").unwrap(), vec![0x59, 0x49, 0x00]);
        assert_eq!(parse_hex("0x01,0x0a").unwrap(), vec![0x01, 0x0A]);
        assert_eq!(parse_hex("de:ad:BE:EF").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn parse_hex_rejects_odd_or_invalid_digits() {
        assert_eq!(parse_hex("123").unwrap_err().code, USAGE);
        assert_eq!(parse_hex("zz").unwrap_err().code, USAGE);
    }

    #[test]
    fn serial_line_args_build_config() {
        let args = SerialLineArgs {
            port: "/dev/ttyUSB0".to_string(),
            baud: 115_200,
            data_bits: 7,
            stop_bits: StopBitsArg::Two,
            parity: ParityArg::Even,
            flow_control: FlowControlArg::None,
            dtr: true,
            rts: false,
        };
        let config = args.config();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.parity, Parity::Even);
        assert!(config.dtr);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn subscribe_all_forwards_every_topic() {
        use labcomm_transport::EventSink;

        let bus = EventBus::new();
        let mut rx = subscribe_all(&bus);
        bus.publish("pump/0x01", &[0x01, 0x02]);
        bus.publish("tracker", b"x");

        assert_eq!(rx.recv().await.unwrap(), ("pump/0x01".to_string(), vec![0x01, 0x02]));
        assert_eq!(rx.recv().await.unwrap(), ("tracker".to_string(), b"x".to_vec()));
    }
}
