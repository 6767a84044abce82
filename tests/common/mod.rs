//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use turbine_rs::loopback::LoopbackServer;
use turbine_rs::{Client, Control, PlugIn, Sink, Source};

/// Fetch timeout used by integration tests
pub const FETCH_TIMEOUT_MS: i64 = 1000;

static NEXT_PORT: AtomicUsize = AtomicUsize::new(7000);

/// Start a loopback server on an address no other test uses.
pub fn start_server() -> Arc<LoopbackServer> {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    LoopbackServer::start(&format!("integration:{}", port))
}

pub fn source(server: &Arc<LoopbackServer>, name: &str) -> Source {
    let mut source = Source::new();
    source.open_connection(server.clone(), name).unwrap();
    source
}

pub fn sink(server: &Arc<LoopbackServer>, name: &str) -> Sink {
    let mut sink = Sink::new();
    sink.open_connection(server.clone(), name).unwrap();
    sink
}

pub fn plugin(server: &Arc<LoopbackServer>, name: &str) -> PlugIn {
    let mut plugin = PlugIn::new();
    plugin.open_connection(server.clone(), name).unwrap();
    plugin
}

pub fn control(server: &Arc<LoopbackServer>, name: &str) -> Control {
    let mut control = Control::new();
    control.open_connection(server.clone(), name).unwrap();
    control
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
