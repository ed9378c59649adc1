//! Frame rate and per-stage latency of the frame loop.
//!
use std::{
    fmt,
    time::{Duration, Instant},
};

/// Stages of the frame loop which are timed separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Capture,
    Inference,
    Render,
}

impl Stage {
    const ALL: [Stage; 3] = [Stage::Capture, Stage::Inference, Stage::Render];

    fn index(self) -> usize {
        self as usize
    }
}

/// Accumulates stage latencies over a reporting window.
#[derive(Debug)]
pub struct FrameMeter {
    report_interval: Duration,
    window_start: Option<Instant>,
    frames: u32,
    stage_totals: [Duration; 3],
}

impl FrameMeter {
    pub fn new(report_interval: Duration) -> Self {
        Self {
            report_interval,
            window_start: None,
            frames: 0,
            stage_totals: [Duration::ZERO; 3],
        }
    }

    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.stage_totals[stage.index()] += elapsed;
    }

    /// Count a completed frame. Once the reporting interval has passed, the window is
    /// summarized and a new one started.
    pub fn finish_frame(&mut self, now: Instant) -> Option<MeterReport> {
        let window_start = *self.window_start.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.saturating_duration_since(window_start);
        if elapsed < self.report_interval || elapsed.is_zero() {
            return None;
        }

        let frames = self.frames;
        let report = MeterReport {
            frames_per_second: frames as f32 / elapsed.as_secs_f32(),
            mean_latency: self.stage_totals.map(|total| total / frames),
        };

        self.window_start = Some(now);
        self.frames = 0;
        self.stage_totals = [Duration::ZERO; 3];

        Some(report)
    }
}

impl Default for FrameMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Summary of one reporting window.
#[derive(Clone, Debug, PartialEq)]
pub struct MeterReport {
    pub frames_per_second: f32,
    mean_latency: [Duration; 3],
}

impl MeterReport {
    /// Mean time spent per frame in a stage.
    pub fn mean_latency(&self, stage: Stage) -> Duration {
        self.mean_latency[stage.index()]
    }
}

impl fmt::Display for MeterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} frames per second", self.frames_per_second)?;
        for stage in Stage::ALL {
            write!(
                f,
                ", {:?} {:.1} ms",
                stage,
                self.mean_latency(stage).as_secs_f64() * 1000.0
            )?;
        }
        Ok(())
    }
}
