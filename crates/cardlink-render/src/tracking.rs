//! Background head-pose sampler that runs while a stream is live.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cardlink_common::ClientSettings;
use cardlink_vr::{DeviceMotion, HeadTracker, StreamClient};
use thiserror::Error;

use crate::pose_math::predict_pose;

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds on the clock shared with the head tracker.
pub fn boot_time_ns() -> u64 {
    CLOCK_EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tracking task did not stop within {0:?}, abandoned")]
    StopTimeout(Duration),
    #[error("tracking task panicked")]
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingConfig {
    /// Tick period of the sampling schedule.
    pub period: Duration,
    pub floor_height: f32,
    pub stop_timeout: Duration,
}

impl TrackingConfig {
    /// The tracker has no prediction of its own, so poses are sampled several times per
    /// refresh (three by default) to approximate a continuous feed.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            period: settings.tracking_period(),
            floor_height: settings.floor_height_m,
            stop_timeout: settings.tracking_stop_timeout(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

/// A running tracking task. Stopping consumes the loop; a new stream starts a new one.
pub struct TrackingLoop {
    running: Arc<AtomicBool>,
    samples_sent: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
    stopped_rx: Receiver<()>,
    stop_timeout: Duration,
}

impl TrackingLoop {
    pub fn start(
        client: Arc<dyn StreamClient>,
        tracker: Arc<dyn HeadTracker>,
        config: TrackingConfig,
    ) -> Result<Self, TrackingError> {
        let running = Arc::new(AtomicBool::new(true));
        let samples_sent = Arc::new(AtomicU64::new(0));
        let (stopped_tx, stopped_rx) = mpsc::channel();

        let thread_running = running.clone();
        let thread_sent = samples_sent.clone();
        let handle = thread::Builder::new()
            .name("cardlink-tracking".to_string())
            .spawn(move || {
                tracing::info!(period = ?config.period, "tracking loop started");
                let mut deadline = Instant::now();
                while thread_running.load(Ordering::Acquire) {
                    let target_ns = boot_time_ns() + client.head_prediction_offset_ns();
                    let pose = predict_pose(tracker.as_ref(), target_ns, config.floor_height);
                    client.send_tracking(target_ns, &[DeviceMotion::head(pose)]);
                    thread_sent.fetch_add(1, Ordering::Relaxed);

                    deadline += config.period;
                    if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
                tracing::info!(
                    samples = thread_sent.load(Ordering::Relaxed),
                    "tracking loop exiting"
                );
                let _ = stopped_tx.send(());
            })?;

        Ok(Self {
            running,
            samples_sent,
            handle: Some(handle),
            stopped_rx,
            stop_timeout: config.stop_timeout,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_some()
    }

    pub fn samples_sent(&self) -> u64 {
        self.samples_sent.load(Ordering::Relaxed)
    }

    /// Signal the task and wait for it to acknowledge, at most `stop_timeout`. A task that
    /// fails to acknowledge in time is detached and reported.
    pub fn stop(mut self) -> Result<(), TrackingError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), TrackingError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        match self.stopped_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                handle.join().map_err(|_| TrackingError::Panicked)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    timeout = ?self.stop_timeout,
                    "tracking task unresponsive, abandoning it"
                );
                drop(handle);
                Err(TrackingError::StopTimeout(self.stop_timeout))
            }
        }
    }
}

impl Drop for TrackingLoop {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "tracking loop dropped without a clean stop");
        }
    }
}
