//! Standing requests: frame subscriptions, time slices and monitors

#![cfg(feature = "loopback")]

mod common;

use common::builders::{request_map, FrameBuilder};
use common::{sink, source, start_server, FETCH_TIMEOUT_MS};
use turbine_rs::{Client, Source};

fn flush_point(src: &mut Source, t: f64) {
    let mut frame = FrameBuilder::new().time(t, 1.0).f64s("c0", &[t]).build();
    src.flush(&mut frame).unwrap();
}

#[test]
fn test_subscribe_delivers_each_new_frame() {
    let server = start_server();
    let mut src = source(&server, "src");
    flush_point(&mut src, 0.0);

    let mut snk = sink(&server, "sink");
    let mut wanted = request_map(&["/Server/src/c0"]);
    snk.subscribe(&mut wanted).unwrap();
    assert!(snk.fetch_new(0).unwrap().fetch_timed_out());

    for t in 1..4 {
        flush_point(&mut src, t as f64);
    }
    for t in 1..4 {
        let result = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
        assert_eq!(result.data_as_f64(0).unwrap(), vec![t as f64]);
    }
}

#[test]
fn test_subscribe_from_oldest_replays_the_cache() {
    let server = start_server();
    let mut src = source(&server, "src");
    flush_point(&mut src, 0.0);
    flush_point(&mut src, 1.0);

    let mut snk = sink(&server, "sink");
    let mut wanted = request_map(&["/Server/src/c0"]);
    snk.subscribe_from(&mut wanted, "oldest").unwrap();
    flush_point(&mut src, 2.0);

    let seen: Vec<f64> = (0..3)
        .map(|_| snk.fetch_new(FETCH_TIMEOUT_MS).unwrap().data_as_f64(0).unwrap()[0])
        .collect();
    assert_eq!(seen, vec![0.0, 1.0, 2.0]);
}

#[test]
fn test_time_slices_arrive_once_complete() {
    let server = start_server();
    let mut src = source(&server, "src");
    let mut snk = sink(&server, "sink");
    let mut wanted = request_map(&["/Server/src/c0"]);
    snk.subscribe_for(&mut wanted, "oldest", 2.0).unwrap();

    for t in 0..2 {
        flush_point(&mut src, t as f64);
    }
    assert!(snk.fetch_new(0).unwrap().fetch_timed_out());

    for t in 2..5 {
        flush_point(&mut src, t as f64);
    }
    let first = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(first.data_as_f64(0).unwrap(), vec![0.0, 1.0]);
    let second = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(second.data_as_f64(0).unwrap(), vec![2.0, 3.0]);
    assert!(snk.fetch_new(0).unwrap().fetch_timed_out());
}

#[test]
fn test_previous_walks_back_through_existing_data() {
    let server = start_server();
    let mut src = source(&server, "src");
    for t in 0..5 {
        flush_point(&mut src, t as f64);
    }

    let mut snk = sink(&server, "sink");
    let mut wanted = request_map(&["/Server/src/c0"]);
    snk.subscribe_at(&mut wanted, 4.0, 2.0, "previous").unwrap();

    let first = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(first.data_as_f64(0).unwrap(), vec![2.0, 3.0]);
    let second = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(second.data_as_f64(0).unwrap(), vec![0.0, 1.0]);
    assert!(snk.fetch_new(0).unwrap().fetch_timed_out());
}

#[test]
fn test_request_frame_takes_the_next_frame_only() {
    let server = start_server();
    let mut src = source(&server, "src");
    flush_point(&mut src, 0.0);

    let mut snk = sink(&server, "sink");
    let mut wanted = request_map(&["/Server/src/c0"]);
    snk.request_frame(&mut wanted).unwrap();
    flush_point(&mut src, 1.0);
    flush_point(&mut src, 2.0);

    let result = snk.fetch_new(FETCH_TIMEOUT_MS).unwrap();
    assert_eq!(result.data_as_f64(0).unwrap(), vec![1.0]);
    assert!(snk.fetch_new(0).unwrap().fetch_timed_out());
}

#[test]
fn test_closing_the_sink_ends_its_subscriptions() {
    let server = start_server();
    let mut src = source(&server, "src");
    let mut snk = sink(&server, "sink");
    let mut wanted = request_map(&["/Server/src/c0"]);
    snk.subscribe(&mut wanted).unwrap();
    snk.close_connection().unwrap();

    flush_point(&mut src, 0.0);
    assert_eq!(server.client_names(), vec!["src"]);
}
