//! Demo work units.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tierloop_core::{FixedUpdatable, LateUpdatable, Tier, UpdateDispatcher, Updatable};

/// Moves forward at a constant speed every update it gets.
pub struct Mover {
    pub id: u32,
    pub position: f32,
    pub speed: f32,
}

impl Mover {
    pub fn new(id: u32, speed: f32) -> Self {
        Self { id, position: 0.0, speed }
    }
}

impl Updatable for Mover {
    fn on_update(&mut self, dt: f32) -> anyhow::Result<()> {
        self.position += self.speed * dt;
        Ok(())
    }
}

/// Periodic decision maker that retires itself after `budget` updates.
pub struct Thinker {
    me: Weak<RefCell<Thinker>>,
    dispatcher: UpdateDispatcher,
    thoughts: u32,
    budget: u32,
    pub elapsed: f32,
}

impl Thinker {
    pub fn spawn(dispatcher: &UpdateDispatcher, budget: u32) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me| {
            RefCell::new(Self {
                me: me.clone(),
                dispatcher: dispatcher.clone(),
                thoughts: 0,
                budget,
                elapsed: 0.0,
            })
        })
    }

    #[inline]
    pub fn thoughts(&self) -> u32 {
        self.thoughts
    }
}

impl Updatable for Thinker {
    fn on_update(&mut self, dt: f32) -> anyhow::Result<()> {
        self.thoughts += 1;
        self.elapsed += dt;

        if self.thoughts >= self.budget {
            if let Some(me) = self.me.upgrade() {
                self.dispatcher.unregister(&me);
                log::info!("thinker retired after {} thoughts", self.thoughts);
            }
        }
        Ok(())
    }
}

/// Logs dispatcher state at the low tier's pace.
pub struct Reporter {
    dispatcher: UpdateDispatcher,
    pub reports: u32,
}

impl Reporter {
    pub fn new(dispatcher: &UpdateDispatcher) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            reports: 0,
        }
    }
}

impl Updatable for Reporter {
    fn on_update(&mut self, _dt: f32) -> anyhow::Result<()> {
        self.reports += 1;
        let stats = self.dispatcher.stats();
        log::debug!(
            "report #{}: high={} medium={} low={} | medium_runs={} low_runs={} pruned={}",
            self.reports,
            self.dispatcher.tier_len(Tier::High),
            self.dispatcher.tier_len(Tier::Medium),
            self.dispatcher.tier_len(Tier::Low),
            stats.tier(Tier::Medium).runs,
            stats.tier(Tier::Low).runs,
            stats.pruned,
        );
        Ok(())
    }
}

/// Falling body integrated on the fixed channel.
pub struct Body {
    pub height: f32,
    pub velocity: f32,
    pub bounces: u32,
}

impl Body {
    const GRAVITY: f32 = -9.81;
    const RESTITUTION: f32 = 0.8;

    pub fn dropped_from(height: f32) -> Self {
        Self { height, velocity: 0.0, bounces: 0 }
    }
}

impl FixedUpdatable for Body {
    fn on_fixed_update(&mut self, fixed_dt: f32) -> anyhow::Result<()> {
        self.velocity += Self::GRAVITY * fixed_dt;
        self.height += self.velocity * fixed_dt;

        if self.height <= 0.0 {
            self.height = 0.0;
            self.velocity = -self.velocity * Self::RESTITUTION;
            self.bounces += 1;
        }
        Ok(())
    }
}

/// Trails a mover after every tier has run.
pub struct Camera {
    target: Rc<RefCell<Mover>>,
    pub position: f32,
    stiffness: f32,
}

impl Camera {
    pub fn follow(target: Rc<RefCell<Mover>>) -> Self {
        let position = target.borrow().position;
        Self { target, position, stiffness: 8.0 }
    }
}

impl LateUpdatable for Camera {
    fn on_late_update(&mut self, dt: f32) -> anyhow::Result<()> {
        let target = self
            .target
            .try_borrow()
            .map_err(|_| anyhow::anyhow!("camera target is busy"))?
            .position;
        let k = (self.stiffness * dt).clamp(0.0, 1.0);
        self.position += (target - self.position) * k;
        Ok(())
    }
}
