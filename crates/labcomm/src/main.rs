mod cmd;
mod exit;
mod logging;
mod output;
mod shutdown;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "labcomm", version, about = "Lab device communication CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| exit::io_error("failed to start runtime", err))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, format)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "labcomm", "send", "9000", "--kind", "udp", "--data", "hello", "--wait",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.port, 9000);
                assert_eq!(args.kind, cmd::NetKind::Udp);
                assert_eq!(args.host, "127.0.0.1");
                assert!(args.wait);
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "labcomm", "send", "9000", "--hex", "01 02", "--data", "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn crc_requires_a_payload() {
        let err = Cli::try_parse_from(["labcomm", "crc"]).expect_err("payload is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_serial_listen_line_settings() {
        let cli = Cli::try_parse_from([
            "labcomm",
            "serial-listen",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
            "--stop-bits",
            "2",
            "--parity",
            "odd",
            "--count",
            "3",
        ])
        .expect("serial-listen args should parse");

        match cli.command {
            Command::SerialListen(args) => {
                assert_eq!(args.line.port, "/dev/ttyUSB0");
                assert_eq!(args.line.baud, 115_200);
                assert_eq!(args.count, Some(3));
            }
            other => panic!("expected serial-listen, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_data_bits() {
        let err = Cli::try_parse_from(["labcomm", "serial-send", "COM3", "--data-bits", "9", "--hex", "01"])
            .expect_err("data bits must be 5..=8");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_run_with_global_format() {
        let cli = Cli::try_parse_from(["labcomm", "run", "--config", "lab.json", "--format", "pretty"])
            .expect("run args should parse");
        assert!(matches!(cli.command, Command::Run(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
    }
}
