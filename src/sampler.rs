//! Amplitude sampler: one energy reading per frame tick, compared against
//! the blow threshold. Fires at most once per session.
//!
//! Ticks come from a `TickSource` so the loop can be driven by a real frame
//! clock or by a test without hardware or a display.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use crate::audio::capture::CaptureSession;

/// Result of a single sampler tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Sampler stopped or session closed; nothing was read.
    Idle,
    /// Reading at or below threshold; the loop continues.
    Below(f32),
    /// Threshold crossed. Reported exactly once.
    Blown(f32),
}

/// Threshold detector over successive session readings.
#[derive(Debug)]
pub struct AmplitudeSampler {
    threshold: f32,
    stopped: bool,
    fired: bool,
    ticks: u64,
}

impl AmplitudeSampler {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            stopped: false,
            fired: false,
            ticks: 0,
        }
    }

    /// Pull one reading from `session` and apply the threshold.
    pub fn tick(&mut self, session: &mut dyn CaptureSession) -> SampleOutcome {
        if self.stopped || self.fired || !session.is_open() {
            return SampleOutcome::Idle;
        }
        self.ticks += 1;
        let amplitude = session.sample().max(0.0);
        if amplitude > self.threshold {
            self.fired = true;
            SampleOutcome::Blown(amplitude)
        } else {
            SampleOutcome::Below(amplitude)
        }
    }

    /// Stop sampling for good. Idempotent.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_running(&self) -> bool {
        !self.stopped && !self.fired
    }

    #[cfg(test)]
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Source of display-refresh ticks. Each call resolves at the next frame.
pub trait TickSource: Send {
    fn next_tick(&mut self) -> impl Future<Output = ()> + Send;
}

/// Frame clock at a fixed refresh rate. Late frames are skipped rather than
/// bursted, so ticks never pile up behind a slow iteration.
pub struct FrameClock {
    interval: Interval,
}

impl FrameClock {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl TickSource for FrameClock {
    async fn next_tick(&mut self) {
        self.interval.tick().await;
    }
}
