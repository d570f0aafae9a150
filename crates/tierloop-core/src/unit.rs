/// A unit of per-frame work.
///
/// The dispatcher never owns units. Hosts keep them in `Rc<RefCell<T>>` and
/// register a reference; the dispatcher holds only a `Weak`.
pub trait Updatable {
    fn on_update(&mut self, dt: f32) -> anyhow::Result<()>;
}

/// Work that runs on the fixed-step channel.
pub trait FixedUpdatable {
    fn on_fixed_update(&mut self, fixed_dt: f32) -> anyhow::Result<()>;
}

/// Work that runs after every tier, once per tick.
pub trait LateUpdatable {
    fn on_late_update(&mut self, dt: f32) -> anyhow::Result<()>;
}

/// Adapter turning a closure into a unit.
///
/// ```
/// use std::{cell::RefCell, rc::Rc};
/// use tierloop_core::{FnUnit, Tier, UpdateDispatcher};
///
/// let dispatcher = UpdateDispatcher::default();
/// let unit = Rc::new(RefCell::new(FnUnit::new(|_dt| Ok(()))));
/// dispatcher.register(&unit, Tier::High).unwrap();
/// dispatcher.tick(0.016).unwrap();
/// ```
pub struct FnUnit<F> {
    f: F,
}

impl<F> FnUnit<F>
where
    F: FnMut(f32) -> anyhow::Result<()>,
{
    #[inline]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Updatable for FnUnit<F>
where
    F: FnMut(f32) -> anyhow::Result<()>,
{
    #[inline]
    fn on_update(&mut self, dt: f32) -> anyhow::Result<()> {
        (self.f)(dt)
    }
}

impl<F> FixedUpdatable for FnUnit<F>
where
    F: FnMut(f32) -> anyhow::Result<()>,
{
    #[inline]
    fn on_fixed_update(&mut self, fixed_dt: f32) -> anyhow::Result<()> {
        (self.f)(fixed_dt)
    }
}

impl<F> LateUpdatable for FnUnit<F>
where
    F: FnMut(f32) -> anyhow::Result<()>,
{
    #[inline]
    fn on_late_update(&mut self, dt: f32) -> anyhow::Result<()> {
        (self.f)(dt)
    }
}
