//! PlugIn helpers running on their own thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use turbine_rs::rmap::DOT;
use turbine_rs::{PlugIn, PlugInChannelMap, RequestType};

/// What a worker saw of one request
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub request_type: RequestType,
    pub id: Option<String>,
    pub start: f64,
    pub duration: f64,
    pub reference: Option<String>,
}

/// A PlugIn answering on a background thread until stopped
pub struct PlugInWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<Seen>>>,
}

impl PlugInWorker {
    /// Stop the worker and return every request it saw.
    pub fn stop(mut self) -> Vec<Seen> {
        self.running.store(false, Ordering::Release);
        self.handle
            .take()
            .map(|h| h.join().unwrap())
            .unwrap_or_default()
    }
}

impl Drop for PlugInWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Answer every data request with `answer(request)` on each requested
/// channel. End-of-stream notices are recorded and not answered.
pub fn spawn_plugin<F>(plugin: PlugIn, answer: F) -> PlugInWorker
where
    F: Fn(&PlugInChannelMap) -> Vec<f64> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        while flag.load(Ordering::Acquire) {
            let mut request = plugin.fetch_new(20).unwrap();
            let Some(request_type) = request.request_type() else {
                continue;
            };
            if request_type == RequestType::Timeout {
                continue;
            }
            seen.push(Seen {
                request_type,
                id: request.request_id().map(str::to_string),
                start: request.request_start(),
                duration: request.request_duration(),
                reference: request.request_reference().map(str::to_string),
            });
            if request_type == RequestType::EndOfStream {
                continue;
            }
            let values = answer(&request);
            for name in request.channel_list() {
                if name == DOT {
                    continue;
                }
                let index = request.index_of(&name).unwrap();
                request.put_data_as_f64(index, &values).unwrap();
            }
            plugin.flush(&mut request, false).unwrap();
        }
        seen
    });
    PlugInWorker {
        running,
        handle: Some(handle),
    }
}

/// Echo the requested start, scaled by the `gain` option.
pub fn gain_answer(request: &PlugInChannelMap) -> Vec<f64> {
    let gain = request
        .plugin_options()
        .get("gain")
        .and_then(|g| g.parse::<f64>().ok())
        .unwrap_or(1.0);
    vec![gain * request.request_start()]
}
