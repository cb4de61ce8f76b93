use std::net::TcpListener;

use assert_cmd::Command;

#[test]
fn rejects_out_of_range_port() {
    Command::new(assert_cmd::cargo::cargo_bin!("rendezvous-relay"))
        .args(["--port", "65536"])
        .assert()
        .failure();
}

#[test]
fn rejects_unknown_flags() {
    Command::new(assert_cmd::cargo::cargo_bin!("rendezvous-relay"))
        .arg("--listen")
        .assert()
        .failure();
}

#[test]
fn bind_failure_is_fatal() {
    let occupied = TcpListener::bind("0.0.0.0:0").expect("bind test listener");
    let port = occupied.local_addr().expect("local addr").port();

    Command::new(assert_cmd::cargo::cargo_bin!("rendezvous-relay"))
        .args(["--port", &port.to_string()])
        .env("NO_COLOR", "1")
        .assert()
        .failure();
}

#[test]
fn client_requires_identity() {
    Command::new(assert_cmd::cargo::cargo_bin!("relay-client"))
        .assert()
        .failure();
}
