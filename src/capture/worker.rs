//! Background acquisition loop: pull, convert, publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::cache::FrameCache;
use crate::capture::convert::{self, ConversionBuffer};
use crate::driver::FrameStream;
use crate::CaptureOptions;

/// Handle to the per-session acquisition thread.
///
/// The loop is stopped cooperatively: the flag is observed at the top of
/// each iteration, so an in-flight pull is allowed to complete or time out
/// first. `stop` therefore waits up to the configured join timeout and
/// detaches the thread if the deadline elapses.
pub(crate) struct AcquisitionLoop {
    stop: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
    done_rx: flume::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionLoop {
    pub fn spawn(
        stream: Box<dyn FrameStream>,
        cache: Arc<FrameCache>,
        options: CaptureOptions,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let faulted = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = flume::bounded(1);

        let handle = {
            let stop = Arc::clone(&stop);
            let faulted = Arc::clone(&faulted);
            thread::spawn(move || {
                run(stream, cache, options, stop, faulted);
                let _ = done_tx.send(());
            })
        };

        Self {
            stop,
            faulted,
            done_rx,
            handle: Some(handle),
        }
    }

    /// Whether the decode circuit breaker has tripped.
    pub fn faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Signal the loop to stop and wait up to `join_timeout` for it to exit.
    /// Returns whether the worker was actually joined.
    pub fn stop(&mut self, join_timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);

        match self.done_rx.recv_timeout(join_timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                // The pull is stuck past its own timeout; detach and let
                // teardown proceed. Driver resources may be left dangling.
                warn!(?join_timeout, "acquisition thread did not stop in time, detaching");
                self.handle.take();
                false
            }
        }
    }
}

fn run(
    mut stream: Box<dyn FrameStream>,
    cache: Arc<FrameCache>,
    options: CaptureOptions,
    stop: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
) {
    let mut scratch = ConversionBuffer::new();
    let mut frames: u64 = 0;
    let mut pull_failures: u32 = 0;
    let mut decode_failures: u32 = 0;

    debug!("acquisition loop started");

    while !stop.load(Ordering::Acquire) {
        let raw = match stream.pull(options.pull_timeout) {
            Ok(raw) => raw,
            Err(err) => {
                pull_failures += 1;
                // Failures before the first frame are normal startup
                // latency; afterwards, report only the first few in a row.
                if frames > 0 && pull_failures <= options.error_report_cap {
                    warn!(%err, consecutive = pull_failures, "raw frame pull failed");
                }
                thread::sleep(options.retry_sleep);
                continue;
            }
        };
        pull_failures = 0;

        // Copy metadata and payload out, then release the driver slot; the
        // raw handle is invalid the moment it is dropped.
        let meta = raw.meta;
        scratch.store(&raw.data);
        drop(raw);

        match convert::decode(&meta, scratch.bytes()) {
            Ok(frame) => {
                frames += 1;
                decode_failures = 0;
                if frames == 1 {
                    info!(width = meta.width, height = meta.height, "first frame decoded");
                }
                cache.publish(frame);
            }
            Err(err) => {
                decode_failures += 1;
                warn!(%err, sequence = meta.sequence, "frame dropped");
                if let Some(max) = options.max_decode_failures {
                    if decode_failures >= max {
                        error!(
                            consecutive = decode_failures,
                            "too many consecutive decode failures, stopping acquisition"
                        );
                        faulted.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        }
    }

    debug!(frames, "acquisition loop exited");
}
