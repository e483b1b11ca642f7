//! Skips mock-server tests on hosts where localhost cannot be bound.
//!
//! Set `EXDOWNLOADER_REQUIRE_SOCKET_TESTS=1` in CI to turn a skip into a
//! failure.

use std::net::TcpListener;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "EXDOWNLOADER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .is_ok_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Whether this host lacks a bindable localhost; logs the skip.
pub fn localhost_unavailable() -> bool {
    let Err(error) = TcpListener::bind("127.0.0.1:0") else {
        return false;
    };
    assert!(
        !sockets_required(),
        "{REQUIRE_ENV} is set but localhost cannot be bound: {error}"
    );
    eprintln!("[socket-bound-test] skipping: cannot bind localhost ({error})");
    true
}

/// A fresh mock server, or `None` when the test has to be skipped.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if localhost_unavailable() {
        return None;
    }
    Some(MockServer::start().await)
}

/// What a skipped test returns.
pub trait Skipped {
    fn skipped() -> Self;
}

impl Skipped for () {
    fn skipped() -> Self {}
}

impl<E> Skipped for Result<(), E> {
    fn skipped() -> Self {
        Ok(())
    }
}

pub fn socket_skip_return<T: Skipped>() -> T {
    T::skipped()
}
