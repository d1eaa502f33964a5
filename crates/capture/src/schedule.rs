//! Periodic worker used to drive the frame producer.
use std::{
    io,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use tracing::trace;

/// How the producer is driven while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScheduleMode {
    /// A dedicated thread ticks once per frame interval.
    #[default]
    Periodic,
    /// Nothing ticks automatically; the owner calls `tick()`.
    Manual,
}

/// A callback run on its own thread at a fixed period until cancelled.
///
/// Cancelling is synchronous: once [`PeriodicTask::cancel`] returns the
/// callback is not running and will never run again.
///
/// # Example
/// ```rust
/// use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
/// use std::time::Duration;
/// use vcam_capture::schedule::PeriodicTask;
///
/// let hits = Arc::new(AtomicU32::new(0));
/// let counter = hits.clone();
/// let task = PeriodicTask::spawn("tick", Duration::from_millis(1), move || {
///     counter.fetch_add(1, Ordering::Relaxed);
/// })
/// .unwrap();
/// std::thread::sleep(Duration::from_millis(20));
/// task.cancel();
/// let seen = hits.load(Ordering::Relaxed);
/// std::thread::sleep(Duration::from_millis(10));
/// assert_eq!(hits.load(Ordering::Relaxed), seen);
/// ```
pub struct PeriodicTask {
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PeriodicTask {
    /// Arm the schedule; the first run happens one `period` from now.
    pub fn spawn<F>(name: &str, period: Duration, mut f: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(Duration::from_micros(100));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            f();
                            deadline += period;
                            // Skip missed periods instead of bursting to catch up.
                            let now = Instant::now();
                            if deadline < now {
                                deadline = now + period;
                            }
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                trace!("periodic task exited");
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Disarm and wait for the worker to exit.
    pub fn cancel(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.teardown();
    }
}
