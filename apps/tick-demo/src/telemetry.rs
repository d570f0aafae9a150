use std::time::{Duration, Instant};

use tierloop_core::{TickSummary, Tier, UpdateDispatcher};

/// Frame-rate and dispatch counters, logged once per period.
pub struct Telemetry {
    pub fps: f32,
    pub dt_ms: f32,

    fps_last: Instant,
    fps_frames: u32,
    fps_period_sec: f32,
    fps_enabled: bool,

    medium_runs: u32,
    low_runs: u32,
    fixed_steps: u32,
}

impl Telemetry {
    pub fn new(enabled: bool, period_sec: f32) -> Self {
        Self {
            fps: 0.0,
            dt_ms: 0.0,
            fps_last: Instant::now(),
            fps_frames: 0,
            fps_period_sec: period_sec.max(0.25),
            fps_enabled: enabled,
            medium_runs: 0,
            low_runs: 0,
            fixed_steps: 0,
        }
    }

    pub fn frame_tick(&mut self, dt: Duration, summary: &TickSummary) {
        self.dt_ms = dt.as_secs_f32() * 1000.0;
        self.medium_runs += summary.medium_ran as u32;
        self.low_runs += summary.low_ran as u32;
        self.fixed_steps += summary.fixed_steps;

        if !self.fps_enabled {
            return;
        }

        self.fps_frames += 1;
        let elapsed = self.fps_last.elapsed().as_secs_f32();

        if elapsed >= self.fps_period_sec {
            self.fps = self.fps_frames as f32 / elapsed.max(0.0001);

            log::info!(
                "fps={:.1} dt_ms={:.2} medium_runs={} low_runs={} fixed_steps={}",
                self.fps,
                self.dt_ms,
                self.medium_runs,
                self.low_runs,
                self.fixed_steps
            );

            self.fps_frames = 0;
            self.medium_runs = 0;
            self.low_runs = 0;
            self.fixed_steps = 0;
            self.fps_last = Instant::now();
        }
    }

    pub fn log_final(&self, dispatcher: &UpdateDispatcher) {
        let st = dispatcher.stats();
        log::info!(
            "ticks={} high_calls={} medium_calls={} low_calls={} fixed_steps={} failures={} pruned={}",
            st.ticks,
            st.tier(Tier::High).invocations,
            st.tier(Tier::Medium).invocations,
            st.tier(Tier::Low).invocations,
            st.fixed_steps,
            st.failures,
            st.pruned
        );
    }
}
