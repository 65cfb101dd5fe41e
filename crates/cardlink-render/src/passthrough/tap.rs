//! Double-tap gesture on the headset, detected from raw accelerometer samples.
//!
//! A tap shows up as two short peaks in the sample-to-sample acceleration change, preceded
//! by a resting phase. Once such a pattern is seen the detector arms for one window; if the
//! headset settles again inside that window the gesture fires once.

use std::collections::VecDeque;

use cardlink_common::PassthroughSettings;

/// Windows with fewer samples per half than this are too coarse to find peaks in.
const MIN_HALF_WINDOW: usize = 4;

#[derive(Debug, Clone)]
pub struct TapDetector {
    window_ns: u64,
    lower: f32,
    upper: f32,
    window_start: Option<u64>,
    armed_at: Option<u64>,
    samples: [VecDeque<f32>; 3],
    half_size: usize,
    sums: VecDeque<f32>,
    triggered: bool,
}

impl TapDetector {
    pub fn new(window_ms: u64, lower: f32, upper: f32) -> Self {
        Self {
            window_ns: window_ms * 1_000_000,
            lower,
            upper,
            window_start: None,
            armed_at: None,
            samples: Default::default(),
            half_size: 0,
            sums: VecDeque::new(),
            triggered: false,
        }
    }

    pub fn from_settings(settings: &PassthroughSettings) -> Self {
        Self::new(
            settings.tap_window_ms,
            settings.tap_lower_bound,
            settings.tap_upper_bound,
        )
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window_ns / 1_000_000, self.lower, self.upper);
    }

    /// Whether enough samples have been seen to size the analysis window.
    pub fn is_calibrated(&self) -> bool {
        self.half_size > 0
    }

    /// Feed one accelerometer sample. Returns `true` exactly when a double tap completes.
    pub fn push_sample(&mut self, timestamp_ns: u64, accel: [f32; 3]) -> bool {
        let window_start = *self.window_start.get_or_insert(timestamp_ns);
        let armed_at = *self.armed_at.get_or_insert(timestamp_ns);
        let window_full = timestamp_ns.saturating_sub(window_start) > self.window_ns;
        let armed = timestamp_ns.saturating_sub(armed_at) <= self.window_ns;

        for (axis, value) in self.samples.iter_mut().zip(accel) {
            axis.push_back(value);
        }
        if window_full {
            for axis in &mut self.samples {
                axis.pop_front();
            }
            if self.half_size == 0 {
                self.half_size = self.samples[0].len() / 2;
            }
            if self.half_size < MIN_HALF_WINDOW {
                tracing::debug!(half_size = self.half_size, "tap window too sparse, restarting");
                self.restart_window();
            }
        }

        if self.half_size == 0 {
            return false;
        }

        let deltas: Vec<Vec<f32>> = self
            .samples
            .iter()
            .map(|axis| {
                axis.iter()
                    .zip(axis.iter().skip(1))
                    .map(|(a, b)| (b - a).abs())
                    .collect()
            })
            .collect();
        let sum_mean: f32 = deltas
            .iter()
            .map(|d| d.iter().sum::<f32>() / d.len() as f32)
            .sum();

        self.sums.push_back(sum_mean);
        if self.sums.len() < deltas[0].len() {
            return false;
        }
        self.sums.pop_front();

        if armed {
            if !self.triggered && sum_mean < self.lower {
                self.triggered = true;
                tracing::info!(timestamp_ns, "double tap detected");
                return true;
            }
            return false;
        }

        self.triggered = false;
        if deltas
            .iter()
            .any(|axis| self.is_candidate(axis, sum_mean))
        {
            tracing::debug!(timestamp_ns, sum_mean, "tap candidate, arming");
            self.armed_at = Some(timestamp_ns);
        }
        false
    }

    /// Forget the window and everything derived from it; the next sample opens a new one.
    fn restart_window(&mut self) {
        for axis in &mut self.samples {
            axis.clear();
        }
        self.sums.clear();
        self.window_start = None;
        self.armed_at = None;
        self.half_size = 0;
        self.triggered = false;
    }

    /// Two genuine in-bounds peaks, one per half of the window, after a resting phase and
    /// with the second peak already decaying.
    fn is_candidate(&self, deltas: &[f32], sum_mean: f32) -> bool {
        let (lower, upper) = (self.lower, self.upper);
        let first = &deltas[..self.half_size];
        let second = &deltas[self.half_size - 1..];
        let max1 = first.iter().copied().fold(f32::MIN, f32::max);
        let max2 = second.iter().copied().fold(f32::MIN, f32::max);

        let in_bounds = |v: f32| (lower..=upper).contains(&v);
        let is_peak = |max: f32, run: &[f32]| {
            max - run[0] >= lower && max - run[run.len() - 1] >= lower
        };
        if !is_peak(max1, first)
            || !is_peak(max2, second)
            || !in_bounds(max1)
            || !in_bounds(max2)
            || !in_bounds(sum_mean)
        {
            return false;
        }

        let mut end = 0;
        for (i, &value) in second.iter().enumerate() {
            if value == max2 {
                end = i;
            }
            if end > 0 && value < lower {
                end = i;
                break;
            }
        }

        let rest_threshold = (lower - 0.3).max(0.5);
        self.sums.front().is_some_and(|&oldest| oldest < rest_threshold) && second[end] < max2
    }
}
