use std::time::{Duration, Instant};

/// One frame's timing, as fed to `UpdateDispatcher::tick`.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous frame, clamped.
    pub dt: f32,
    /// Unclamped seconds since the previous frame.
    pub raw_dt: f64,
    pub now: Instant,
    pub frame_index: u64,
}

/// Host-side frame clock.
///
/// Delta time is clamped so that a stalled host (debugger, minimized window)
/// does not feed one huge step into the throttled tiers.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Restarts the baseline, e.g. after the host resumes from a pause.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    /// Advances the clock to `now`.
    pub fn tick_at(&mut self, now: Instant) -> FrameTime {
        let raw = now.saturating_duration_since(self.last);
        let dt = raw.clamp(self.dt_min, self.dt_max);
        self.last = now;

        let ft = FrameTime {
            dt: dt.as_secs_f32(),
            raw_dt: raw.as_secs_f64(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

/// Fixed frame budget for hosts that pace their own loop.
#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    budget: Duration,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        let fps = target_fps.max(1) as u64;
        Self {
            budget: Duration::from_nanos(1_000_000_000 / fps),
        }
    }

    #[inline]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left in the budget for a frame that started at `frame_start`.
    pub fn remaining(&self, frame_start: Instant, now: Instant) -> Duration {
        self.budget
            .saturating_sub(now.saturating_duration_since(frame_start))
    }
}
