//! Requests routed to PlugIns and their answers

#![cfg(feature = "loopback")]

mod common;

use common::builders::request_map;
use common::mock_helpers::{gain_answer, spawn_plugin};
use common::{plugin, sink, start_server, FETCH_TIMEOUT_MS};
use turbine_rs::{Client, RequestType};

#[test]
fn test_plugin_answers_with_options() {
    let server = start_server();
    let worker = spawn_plugin(plugin(&server, "plug"), gain_answer);

    let mut snk = sink(&server, "sink");
    let mut asked = request_map(&["/Server/plug/x"]);
    asked.add_plugin_option("/Server/plug", "gain", "2").unwrap();
    snk.request(&mut asked, 5.0, 1.0, "absolute").unwrap();
    let result = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();

    let x = result.index_of("/Server/plug/x").unwrap();
    assert_eq!(result.data_as_f64(x).unwrap(), vec![10.0]);
    assert_eq!(result.time_start(x).unwrap(), 5.0);

    let seen = worker.stop();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].request_type, RequestType::Request);
    assert_eq!(seen[0].id.as_deref(), Some("req-1"));
    assert_eq!(seen[0].reference.as_deref(), Some("absolute"));
    assert_eq!(seen[0].duration, 1.0);
}

#[test]
fn test_one_request_covers_every_channel_of_a_plugin() {
    let server = start_server();
    let worker = spawn_plugin(plugin(&server, "plug"), |_| vec![1.0, 2.0]);

    let mut snk = sink(&server, "sink");
    let mut asked = request_map(&["/Server/plug/a", "/Server/plug/b"]);
    snk.request(&mut asked, 0.0, 1.0, "absolute").unwrap();
    let result = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();

    for name in ["/Server/plug/a", "/Server/plug/b"] {
        let index = result.index_of(name).unwrap();
        assert_eq!(result.data_as_f64(index).unwrap(), vec![1.0, 2.0]);
    }
    assert_eq!(worker.stop().len(), 1);
}

#[test]
fn test_unanswered_request_times_out() {
    let server = start_server();
    let _plug = plugin(&server, "plug");

    let mut snk = sink(&server, "sink");
    let mut asked = request_map(&["/Server/plug/x"]);
    snk.request(&mut asked, 0.0, 1.0, "absolute").unwrap();
    assert!(snk.fetch_new(50).unwrap().fetch_timed_out());
}

#[test]
fn test_closed_subscription_reaches_the_plugin() {
    let server = start_server();
    let plug = plugin(&server, "plug");
    let mut snk = sink(&server, "sink");
    let mut asked = request_map(&["/Server/plug/x"]);
    snk.subscribe(&mut asked).unwrap();

    let mut request = plug.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(request.request_type(), Some(RequestType::Subscribe));
    assert!(request.is_request_frames());
    let id = request.request_id().map(str::to_string);
    let x = request.index_of("x").unwrap();
    request.put_data_as_f64(x, &[3.0]).unwrap();
    plug.flush(&mut request, false).unwrap();

    let result = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(result.data_as_f64(0).unwrap(), vec![3.0]);

    snk.close_connection().unwrap();
    let end = plug.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(end.request_type(), Some(RequestType::EndOfStream));
    assert_eq!(end.request_id().map(str::to_string), id);
}

#[test]
fn test_plugin_refuses_streamed_answers() {
    let server = start_server();
    let plug = plugin(&server, "plug");
    let mut request = plug.fetch_new(0).unwrap();
    assert_eq!(request.request_type(), Some(RequestType::Timeout));
    assert!(plug.flush(&mut request, true).is_err());
}
