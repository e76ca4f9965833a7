use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::net::UdpSocket;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn relay() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("aesoplite-relay"))
}

/// Writes a config and a parameter directory under a fresh tempdir.
fn workspace(destinations: &str, device: &Path) -> (TempDir, std::path::PathBuf) {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let params = tmp.path().join("params");
    fs::create_dir_all(&params).expect("create params");
    fs::write(params.join("udp_destinations"), format!("{destinations}\n")).unwrap();
    fs::write(params.join("device_path"), format!("{}\n", device.display())).unwrap();
    fs::write(
        params.join("data_directory"),
        format!("{}\n", tmp.path().join("data").display()),
    )
    .unwrap();
    fs::write(params.join("run_number"), "00001\n").unwrap();

    let cfg_path = tmp.path().join("relay.toml");
    let cfg = format!(
        "service_name = \"e2e-relay\"\nlog_level = \"debug\"\nparameter_directory = \"{}\"\npacing_micros_per_byte = 0\nread_timeout_ms = 200\n",
        params.display()
    );
    fs::write(&cfg_path, cfg).expect("write config");
    (tmp, cfg_path)
}

#[test]
fn invalid_destination_fails_before_opening_the_link() {
    let scratch = tempfile::tempdir().unwrap();
    let capture = scratch.path().join("capture.dat");
    fs::write(&capture, vec![0u8; 68]).unwrap();
    let (tmp, cfg) = workspace("bad", &capture);

    relay()
        .arg("--config")
        .arg(&cfg)
        .assert()
        .failure()
        .stderr(contains("udp_destinations"));

    assert!(!tmp.path().join("data").exists(), "no output file may be opened");
}

#[test]
fn replay_writes_capture_to_file_and_network() {
    let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
    receiver
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let destination = receiver.local_addr().unwrap().to_string();

    let scratch = tempfile::tempdir().unwrap();
    let capture = scratch.path().join("capture.dat");
    let bytes: Vec<u8> = (0..34 * 25).map(|i| (i % 251) as u8).collect();
    fs::write(&capture, &bytes).unwrap();

    let (tmp, cfg) = workspace(&destination, Path::new("/dev/does-not-exist"));
    relay()
        .arg("--config")
        .arg(&cfg)
        .arg("--replay")
        .arg(&capture)
        .timeout(Duration::from_secs(30))
        .assert()
        .success();

    let outputs: Vec<_> = fs::read_dir(tmp.path().join("data"))
        .expect("data dir")
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("AL00001_"));
    assert_eq!(fs::read(&outputs[0]).unwrap(), bytes);

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while let Ok((n, _)) = receiver.recv_from(&mut buf) {
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, bytes);

    let stored = fs::read_to_string(tmp.path().join("params/run_number")).unwrap();
    assert_eq!(stored, "00002\n");
}

#[test]
fn version_flag_prints_version() {
    relay()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
