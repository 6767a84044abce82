//! turbine-demo - loopback round trip
//!
//! Starts an in-process server, writes a few frames from a source, reads them
//! back with a sink, asks a PlugIn for computed data and prints the
//! registered channel tree.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use turbine_rs::{
    config::ClientConfig, loopback::LoopbackServer, rmap::DOT, ChannelMap, Client, Control,
    PlugIn, RequestType, Sink, Source,
};

const FRAMES: usize = 10;
const POINTS_PER_FRAME: usize = 8;

fn init_logging(config: &ClientConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "turbine-demo.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Answer every request with a sine over the requested range, scaled by the
/// `gain` option.
fn serve_waves(plugin: &PlugIn, running: &AtomicBool) -> turbine_rs::Result<usize> {
    let mut answered = 0;
    while running.load(Ordering::Acquire) {
        let mut request = plugin.fetch_new(100)?;
        match request.request_type() {
            Some(RequestType::Request | RequestType::Subscribe | RequestType::Monitor) => {}
            _ => continue,
        }
        let gain = request
            .plugin_options()
            .get("gain")
            .and_then(|g| g.parse::<f64>().ok())
            .unwrap_or(1.0);
        let start = request.request_start();
        let step = request.request_duration() / POINTS_PER_FRAME as f64;
        let values: Vec<f64> = (0..POINTS_PER_FRAME)
            .map(|i| gain * (start + step * i as f64).sin())
            .collect();

        for name in request.channel_list() {
            if name == DOT {
                continue;
            }
            if let Some(index) = request.index_of(&name) {
                request.put_data_as_f64(index, &values)?;
            }
        }
        tracing::debug!("Answering {:?} for {:?}", request.request_id(), request.channel_list());
        plugin.flush(&mut request, false)?;
        answered += 1;
    }
    Ok(answered)
}

fn main() -> Result<()> {
    let mut config = ClientConfig::load_or_default();
    config.apply_env();
    config.validate().context("Invalid client configuration")?;
    let _guard = init_logging(&config);

    tracing::info!("Starting turbine-demo on {}", config.server_address);
    let server = LoopbackServer::start(&config.server_address);

    // PlugIn answering on its own thread
    let mut plugin = PlugIn::from_config(&config);
    plugin.open_connection(server.clone(), "Waves")?;
    let mut offered = ChannelMap::new();
    let wave = offered.add("wave")?;
    offered.put_user_info(wave, "sine computed on request")?;
    plugin.register(&mut offered)?;
    let plugin = Arc::new(plugin);
    let running = Arc::new(AtomicBool::new(true));
    let worker = {
        let plugin = Arc::clone(&plugin);
        let running = Arc::clone(&running);
        thread::spawn(move || serve_waves(&plugin, &running))
    };

    // Source writing frames with explicit times
    let mut source = Source::from_config(&config);
    source.open_connection(server.clone(), "Generator")?;
    let mut map = ChannelMap::new();
    let sine = map.add("sine")?;
    let count = map.add("count")?;
    map.put_mime(sine, "application/octet-stream");
    map.put_user_info(count, "frame counter")?;
    source.register(&mut map)?;
    for frame in 0..FRAMES {
        let t0 = frame as f64;
        let values: Vec<f64> = (0..POINTS_PER_FRAME)
            .map(|i| (t0 + i as f64 / POINTS_PER_FRAME as f64).sin())
            .collect();
        map.put_time(t0, 1.0);
        map.put_data_as_f64(sine, &values)?;
        map.put_data_as_i32(count, &[frame as i32])?;
        source.flush(&mut map)?;
    }
    tracing::info!("Source flushed {} frames", FRAMES);

    // Sink reading back the newest three seconds
    let mut sink = Sink::from_config(&config);
    sink.open_connection(server.clone(), "Reader")?;
    let mut wanted = ChannelMap::new();
    wanted.add("/Server/Generator/sine")?;
    wanted.add("/Server/Generator/count")?;
    sink.request(&mut wanted, 0.0, 3.0, "newest")?;
    let result = sink.fetch_new(config.fetch_timeout_ms)?;
    for name in result.channel_list() {
        let index = result
            .index_of(&name)
            .ok_or_else(|| anyhow!("{} vanished from the result", name))?;
        tracing::info!(
            "{}: {} points from t={} over {}s",
            name,
            result.times(index)?.len(),
            result.time_start(index)?,
            result.time_duration(index)?
        );
    }

    // Sink asking the PlugIn
    let mut asked = ChannelMap::new();
    asked.add("/Server/Waves/wave")?;
    asked.add_plugin_option("/Server/Waves", "gain", "2")?;
    sink.request(&mut asked, 0.0, 1.0, "absolute")?;
    let answer = sink.fetch_new(config.fetch_timeout_ms)?;
    if answer.fetch_timed_out() {
        tracing::warn!("PlugIn did not answer in time");
    } else if let Some(index) = answer.index_of("/Server/Waves/wave") {
        tracing::info!("PlugIn answered {:?}", answer.data_as_f64(index)?);
    }

    // Control browsing the server
    let mut control = Control::from_config(&config);
    control.open_connection(server.clone(), "Admin")?;
    let tree = control.channel_tree("")?;
    println!("{}", tree);

    running.store(false, Ordering::Release);
    let answered = worker
        .join()
        .map_err(|_| anyhow!("PlugIn thread panicked"))??;
    tracing::info!(
        "PlugIn answered {} requests; sink transferred {} bytes",
        answered,
        sink.bytes_transferred()
    );

    sink.close_connection()?;
    source.detach()?;
    control.close_connection()?;
    tracing::info!("Shutting down...");
    Ok(())
}
