use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tierloop_core::{FrameClock, FramePacer, UpdateDispatcher};

use crate::{
    config::AppConfig,
    signals::ExitSignal,
    telemetry::Telemetry,
    units::{Body, Camera, Mover, Reporter, Thinker},
};

/// Headless frame driver.
///
/// Owns the single dispatcher of the process and the strong references to
/// every demo unit; the dispatcher itself only holds weak ones.
pub struct DemoHost {
    cfg: AppConfig,
    dispatcher: UpdateDispatcher,
    exit: ExitSignal,

    movers: Vec<Rc<RefCell<Mover>>>,
    thinker: Option<Rc<RefCell<Thinker>>>,
    reporter: Option<Rc<RefCell<Reporter>>>,
    body: Option<Rc<RefCell<Body>>>,
    camera: Option<Rc<RefCell<Camera>>>,
}

impl DemoHost {
    pub fn new(cfg: AppConfig, exit: ExitSignal) -> Result<Self> {
        let dispatcher = UpdateDispatcher::new(cfg.dispatcher.clone())?;
        Ok(Self {
            cfg,
            dispatcher,
            exit,
            movers: Vec::new(),
            thinker: None,
            reporter: None,
            body: None,
            camera: None,
        })
    }

    #[inline]
    pub fn dispatcher(&self) -> &UpdateDispatcher {
        &self.dispatcher
    }

    /// Creates the demo units and registers them.
    pub fn spawn_units(&mut self) -> Result<()> {
        let units = self.cfg.units.clone();
        let d = &self.dispatcher;

        for i in 0..units.movers {
            let mover = Rc::new(RefCell::new(Mover::new(i, 1.0 + i as f32)));
            d.register(&mover, &units.mover_tier)
                .with_context(|| format!("mover #{i}"))?;
            self.movers.push(mover);
        }

        let thinker = Thinker::spawn(d, units.thinker_budget);
        d.register(&thinker, &units.thinker_tier).context("thinker")?;
        self.thinker = Some(thinker);

        let reporter = Rc::new(RefCell::new(Reporter::new(d)));
        d.register(&reporter, &units.reporter_tier).context("reporter")?;
        self.reporter = Some(reporter);

        if units.physics {
            let body = Rc::new(RefCell::new(Body::dropped_from(2.0)));
            d.register_fixed(&body).context("body")?;
            self.body = Some(body);
        }

        if units.camera {
            if let Some(target) = self.movers.first() {
                let camera = Rc::new(RefCell::new(Camera::follow(target.clone())));
                d.register_late(&camera).context("camera")?;
                self.camera = Some(camera);
            }
        }

        log::info!(
            "spawned {} mover(s), thinker, reporter{}{}",
            self.movers.len(),
            if self.body.is_some() { ", body" } else { "" },
            if self.camera.is_some() { ", camera" } else { "" },
        );
        Ok(())
    }

    pub fn run(&mut self) -> Result<u64> {
        let frame = &self.cfg.frame;
        let max_dt = Duration::from_millis(frame.max_dt_ms.max(1) as u64);
        let mut clock = FrameClock::with_clamps(Duration::ZERO, max_dt);
        let pacer = FramePacer::new(frame.target_fps);
        let mut telemetry = Telemetry::new(frame.log_fps, frame.fps_log_period_ms as f32 / 1000.0);
        let max_frames = frame.max_frames;

        log::info!("first frame (target_fps={}, max_frames={})", frame.target_fps, max_frames);

        let mut frames = 0u64;
        loop {
            if let Some(reason) = self.exit.reason() {
                log::info!("exit requested ({reason:?})");
                break;
            }
            if max_frames > 0 && frames >= max_frames {
                break;
            }

            let frame_start = Instant::now();
            let ft = clock.tick_at(frame_start);

            let summary = self
                .dispatcher
                .tick(ft.dt)
                .with_context(|| format!("frame {}", ft.frame_index))?;

            telemetry.frame_tick(Duration::from_secs_f64(ft.raw_dt), &summary);
            frames += 1;

            let left = pacer.remaining(frame_start, Instant::now());
            if !left.is_zero() {
                thread::sleep(left);
            }
        }

        telemetry.log_final(&self.dispatcher);
        self.log_units();
        Ok(frames)
    }

    fn log_units(&self) {
        for m in &self.movers {
            let m = m.borrow();
            log::info!("mover #{} at {:.2}", m.id, m.position);
        }
        if let Some(t) = &self.thinker {
            let t = t.borrow();
            log::info!("thinker: {} thoughts over {:.2}s", t.thoughts(), t.elapsed);
        }
        if let Some(r) = &self.reporter {
            log::info!("reporter: {} reports", r.borrow().reports);
        }
        if let Some(b) = &self.body {
            let b = b.borrow();
            log::info!("body: height {:.2}, {} bounce(s)", b.height, b.bounces);
        }
        if let Some(c) = &self.camera {
            log::info!("camera at {:.2}", c.borrow().position);
        }
    }
}
