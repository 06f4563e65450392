#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use labcomm::frame::encode;

fn labcomm() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_labcomm"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn run(args: &[&str]) -> Output {
    labcomm().args(args).output().expect("labcomm should run")
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "labcomm-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port should be available")
        .port()
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if child.try_wait().expect("child should be waitable").is_some() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

#[test]
fn crc_reports_checksum_and_frame() {
    let output = run(&["--format", "json", "crc", "--data", "123456789"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"crc\":\"0x31C3\""), "{stdout}");
    let frame = encode(b"123456789")
        .unwrap()
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    assert!(stdout.contains(&format!("\"frame\":\"{frame}\"")), "{stdout}");
}

#[test]
fn crc_raw_writes_wire_bytes() {
    let output = run(&["--format", "raw", "crc", "--hex", "01 02"]);

    assert!(output.status.success());
    assert_eq!(output.stdout, encode(&[0x01, 0x02]).unwrap().to_vec());
}

#[test]
fn crc_of_oversized_payload_has_no_frame() {
    let dir = unique_temp_dir("crc");
    let path = dir.join("payload.bin");
    std::fs::write(&path, vec![0xAA; 300]).unwrap();

    let output = run(&["--format", "json", "crc", "--file", path.to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"input_size\":300"), "{stdout}");
    assert!(stdout.contains("\"frame\":null"), "{stdout}");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_hex_returns_64() {
    let output = run(&["crc", "--hex", "5"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid hex payload"));
}

#[test]
fn version_prints_name() {
    let output = run(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("labcomm "));
}

#[test]
fn run_with_missing_config_returns_60() {
    let dir = unique_temp_dir("missing");
    let path = dir.join("absent.json");

    let output = run(&["run", "--config", path.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_with_malformed_config_returns_60() {
    let dir = unique_temp_dir("malformed");
    let path = dir.join("lab.json");
    std::fs::write(
        &path,
        r#"{"channels": [{"transport": "network", "name": "x", "kind": "sctp"}]}"#,
    )
    .unwrap();

    let output = run(&["run", "--config", path.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_closed_port_returns_1() {
    let port = free_tcp_port().to_string();
    let output = run(&["send", &port, "--data", "hello"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to connect"));
}

#[test]
fn send_with_invalid_host_returns_64() {
    let output = run(&["send", "9000", "--host", "localhost", "--data", "hello"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn serve_prints_what_send_delivers() {
    let port = free_tcp_port().to_string();

    let mut server = labcomm()
        .args(["--format", "json", "serve", &port, "--count", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");

    let start = Instant::now();
    loop {
        let output = run(&["--format", "json", "send", &port, "--data", "hello", "--wait"]);
        if output.status.success() {
            // The server's heartbeat is the response.
            let stdout = String::from_utf8_lossy(&output.stdout);
            assert!(stdout.contains("\"payload_hex\":\"00"), "{stdout}");
            break;
        }
        if start.elapsed() > Duration::from_secs(5) {
            let _ = server.kill();
            panic!("server never accepted a connection");
        }
        thread::sleep(Duration::from_millis(50));
    }

    if !wait_with_timeout(&mut server, Duration::from_secs(5)) {
        let _ = server.kill();
        panic!("serve did not exit after --count 1");
    }

    let mut stdout = String::new();
    server
        .stdout
        .take()
        .expect("stdout is piped")
        .read_to_string(&mut stdout)
        .unwrap();
    assert!(stdout.contains("\"topic\":\"serve\""), "{stdout}");
    // The client's own heartbeat may share the read with the payload.
    assert!(
        stdout.contains("\"payload_hex\":\"68 65 6C 6C 6F"),
        "{stdout}"
    );
}
