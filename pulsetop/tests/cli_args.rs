//! CLI arg handling for the pulsetop binary.
use assert_cmd::Command;

#[test]
fn help_lists_flags() {
    let out = Command::cargo_bin("pulsetop")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(
        text.contains("Usage:") && text.contains("--max-retries") && text.contains("--once"),
        "help text missing expected flags\n{text}"
    );
}

#[test]
fn unknown_flag_fails() {
    let out = Command::cargo_bin("pulsetop")
        .unwrap()
        .arg("--tls-ca")
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--tls-ca"));
}

#[test]
fn gives_up_when_nothing_listens() {
    // Port 9 on loopback refuses quickly; zero retries means one attempt.
    let out = Command::cargo_bin("pulsetop")
        .unwrap()
        .args(["--max-retries", "0", "--retry-delay-ms", "10", "ws://127.0.0.1:9/ws"])
        .timeout(std::time::Duration::from_secs(20))
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("gave up"));
}
