use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::config::{DeltaMode, DispatcherConfig, DuplicatePolicy, FailurePolicy};
use crate::error::{ConfigError, DispatchError, DispatchResult};
use crate::registration::Registration;
use crate::stats::{DispatchStats, TickSummary};
use crate::tier::{IntoTier, Slot, Tier};
use crate::unit::{FixedUpdatable, LateUpdatable, Updatable};

/// Tiered per-frame update dispatcher.
///
/// The host creates one dispatcher at startup and hands clones of it to
/// whatever needs to register work. Clones share the same state.
///
/// Tick order: fixed steps, High, Medium (throttled), Low (throttled), late.
///
/// Each sequence is snapshotted before it is walked, so units may register
/// or unregister (themselves or others) from inside their callbacks:
/// - units added during a walk run from the next walk on
/// - units removed during a walk are skipped if their turn has not come yet
/// - no unit is invoked twice by one walk
#[derive(Clone)]
pub struct UpdateDispatcher {
    inner: Rc<Inner>,
}

pub(crate) struct Inner {
    config: DispatcherConfig,
    state: RefCell<State>,
    ticking: Cell<bool>,
}

struct State {
    tiers: [UnitList<dyn Updatable>; 3],
    fixed: UnitList<dyn FixedUpdatable>,
    late: UnitList<dyn LateUpdatable>,

    medium_timer: f32,
    low_timer: f32,
    fixed_acc: f32,

    next_id: u64,
    stats: DispatchStats,
}

struct Entry<U: ?Sized> {
    id: u64,
    addr: usize,
    unit: Weak<RefCell<U>>,
}

impl<U: ?Sized> Clone for Entry<U> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            addr: self.addr,
            unit: self.unit.clone(),
        }
    }
}

/// Ordered, non-owning unit sequence.
///
/// Entries are only ever appended with a freshly allocated id and removed in
/// place, so `entries` stays sorted by `id`.
struct UnitList<U: ?Sized> {
    entries: Vec<Entry<U>>,
}

impl<U: ?Sized> Default for UnitList<U> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<U: ?Sized> UnitList<U> {
    #[inline]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn contains_addr(&self, addr: usize) -> bool {
        self.entries.iter().any(|e| e.addr == addr)
    }

    #[inline]
    fn find_id(&self, id: u64) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |e| e.id).ok()
    }

    #[inline]
    fn contains_id(&self, id: u64) -> bool {
        self.find_id(id).is_some()
    }

    /// Removes the first entry for `addr`.
    fn remove_first(&mut self, addr: usize) -> bool {
        match self.entries.iter().position(|e| e.addr == addr) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    fn remove_id(&mut self, id: u64) -> bool {
        match self.find_id(id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    #[inline]
    fn snapshot(&self) -> Vec<Entry<U>> {
        self.entries.clone()
    }
}

/// Glue between a unit trait object and the sequence that stores it.
trait Channel: 'static {
    fn list(state: &mut State, slot: Slot) -> Option<&mut UnitList<Self>>;
    fn invoke(&mut self, dt: f32) -> anyhow::Result<()>;
}

impl Channel for dyn Updatable {
    fn list(state: &mut State, slot: Slot) -> Option<&mut UnitList<Self>> {
        match slot {
            Slot::Tier(t) => Some(&mut state.tiers[t.index()]),
            _ => None,
        }
    }

    #[inline]
    fn invoke(&mut self, dt: f32) -> anyhow::Result<()> {
        self.on_update(dt)
    }
}

impl Channel for dyn FixedUpdatable {
    fn list(state: &mut State, slot: Slot) -> Option<&mut UnitList<Self>> {
        match slot {
            Slot::Fixed => Some(&mut state.fixed),
            _ => None,
        }
    }

    #[inline]
    fn invoke(&mut self, dt: f32) -> anyhow::Result<()> {
        self.on_fixed_update(dt)
    }
}

impl Channel for dyn LateUpdatable {
    fn list(state: &mut State, slot: Slot) -> Option<&mut UnitList<Self>> {
        match slot {
            Slot::Late => Some(&mut state.late),
            _ => None,
        }
    }

    #[inline]
    fn invoke(&mut self, dt: f32) -> anyhow::Result<()> {
        self.on_late_update(dt)
    }
}

/// Thin address of a shared unit, used as its identity.
#[inline]
fn addr_of<T: ?Sized>(unit: &Rc<RefCell<T>>) -> usize {
    Rc::as_ptr(unit) as *const () as usize
}

/// Clears the reentrancy flag even when a callback unwinds.
struct TickGuard<'a>(&'a Cell<bool>);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Default for UpdateDispatcher {
    fn default() -> Self {
        Self::from_parts(DispatcherConfig::default())
    }
}

impl UpdateDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(config))
    }

    fn from_parts(config: DispatcherConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                state: RefCell::new(State {
                    tiers: Default::default(),
                    fixed: UnitList::default(),
                    late: UnitList::default(),
                    medium_timer: 0.0,
                    low_timer: 0.0,
                    fixed_acc: 0.0,
                    next_id: 1,
                    stats: DispatchStats::default(),
                }),
                ticking: Cell::new(false),
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Appends `unit` to the end of `tier`'s sequence.
    pub fn register<T, P>(&self, unit: &Rc<RefCell<T>>, tier: P) -> DispatchResult<()>
    where
        T: Updatable + 'static,
        P: IntoTier,
    {
        let erased: Rc<RefCell<dyn Updatable>> = unit.clone();
        self.register_dyn(&erased, tier)
    }

    /// Same as [`register`](Self::register) for an already type-erased unit.
    pub fn register_dyn<P: IntoTier>(
        &self,
        unit: &Rc<RefCell<dyn Updatable>>,
        tier: P,
    ) -> DispatchResult<()> {
        let tier = tier.into_tier()?;
        self.inner.push_tier(unit, tier).map(|_| ())
    }

    /// Registers `unit` and returns a guard that unregisters it on drop.
    pub fn register_scoped<T, P>(&self, unit: &Rc<RefCell<T>>, tier: P) -> DispatchResult<Registration>
    where
        T: Updatable + 'static,
        P: IntoTier,
    {
        let tier = tier.into_tier()?;
        let erased: Rc<RefCell<dyn Updatable>> = unit.clone();
        let id = self.inner.push_tier(&erased, tier)?;
        Ok(Registration::new(
            Rc::downgrade(&self.inner),
            Slot::Tier(tier),
            id,
        ))
    }

    /// Removes the first occurrence of `unit`, searching High, Medium, then Low.
    ///
    /// Unknown units are ignored.
    pub fn unregister<T: ?Sized>(&self, unit: &Rc<RefCell<T>>) {
        let addr = addr_of(unit);
        let mut st = self.inner.state_mut();
        for tier in Tier::ALL {
            if st.tiers[tier.index()].remove_first(addr) {
                log::debug!("unit unregistered from {tier} tier");
                return;
            }
        }
    }

    pub fn register_fixed<T>(&self, unit: &Rc<RefCell<T>>) -> DispatchResult<()>
    where
        T: FixedUpdatable + 'static,
    {
        let erased: Rc<RefCell<dyn FixedUpdatable>> = unit.clone();
        self.inner.push_channel(&erased, Slot::Fixed, |st| &mut st.fixed).map(|_| ())
    }

    /// Scoped variant of [`register_fixed`](Self::register_fixed).
    pub fn register_fixed_scoped<T>(&self, unit: &Rc<RefCell<T>>) -> DispatchResult<Registration>
    where
        T: FixedUpdatable + 'static,
    {
        let erased: Rc<RefCell<dyn FixedUpdatable>> = unit.clone();
        let id = self.inner.push_channel(&erased, Slot::Fixed, |st| &mut st.fixed)?;
        Ok(Registration::new(Rc::downgrade(&self.inner), Slot::Fixed, id))
    }

    pub fn unregister_fixed<T: ?Sized>(&self, unit: &Rc<RefCell<T>>) {
        if self.inner.state_mut().fixed.remove_first(addr_of(unit)) {
            log::debug!("unit unregistered from fixed channel");
        }
    }

    pub fn register_late<T>(&self, unit: &Rc<RefCell<T>>) -> DispatchResult<()>
    where
        T: LateUpdatable + 'static,
    {
        let erased: Rc<RefCell<dyn LateUpdatable>> = unit.clone();
        self.inner.push_channel(&erased, Slot::Late, |st| &mut st.late).map(|_| ())
    }

    /// Scoped variant of [`register_late`](Self::register_late).
    pub fn register_late_scoped<T>(&self, unit: &Rc<RefCell<T>>) -> DispatchResult<Registration>
    where
        T: LateUpdatable + 'static,
    {
        let erased: Rc<RefCell<dyn LateUpdatable>> = unit.clone();
        let id = self.inner.push_channel(&erased, Slot::Late, |st| &mut st.late)?;
        Ok(Registration::new(Rc::downgrade(&self.inner), Slot::Late, id))
    }

    pub fn unregister_late<T: ?Sized>(&self, unit: &Rc<RefCell<T>>) {
        if self.inner.state_mut().late.remove_first(addr_of(unit)) {
            log::debug!("unit unregistered from late channel");
        }
    }

    /// Drops every registration. Timers are kept.
    pub fn clear(&self) {
        let mut st = self.inner.state_mut();
        for list in st.tiers.iter_mut() {
            list.entries.clear();
        }
        st.fixed.entries.clear();
        st.late.entries.clear();
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    /// Number of tier entries (fixed and late channels excluded).
    pub fn len(&self) -> usize {
        self.inner.state.borrow().tiers.iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier_len(&self, tier: Tier) -> usize {
        self.inner.state.borrow().tiers[tier.index()].len()
    }

    pub fn fixed_len(&self) -> usize {
        self.inner.state.borrow().fixed.len()
    }

    pub fn late_len(&self) -> usize {
        self.inner.state.borrow().late.len()
    }

    /// First tier holding `unit`, in search order.
    pub fn tier_of<T: ?Sized>(&self, unit: &Rc<RefCell<T>>) -> Option<Tier> {
        let addr = addr_of(unit);
        let st = self.inner.state.borrow();
        Tier::ALL
            .into_iter()
            .find(|t| st.tiers[t.index()].contains_addr(addr))
    }

    #[inline]
    pub fn contains<T: ?Sized>(&self, unit: &Rc<RefCell<T>>) -> bool {
        self.tier_of(unit).is_some()
    }

    #[inline]
    pub fn medium_timer(&self) -> f32 {
        self.inner.state.borrow().medium_timer
    }

    #[inline]
    pub fn low_timer(&self) -> f32 {
        self.inner.state.borrow().low_timer
    }

    #[inline]
    pub fn fixed_accumulator(&self) -> f32 {
        self.inner.state.borrow().fixed_acc
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.state.borrow().stats
    }

    pub fn reset_stats(&self) {
        self.inner.state_mut().stats = DispatchStats::default();
    }

    // ---------------------------------------------------------------------
    // Frame entry point
    // ---------------------------------------------------------------------

    /// Runs one frame worth of updates.
    ///
    /// `elapsed` is the time since the previous tick, in seconds. Negative or
    /// non-finite values are treated as 0.
    pub fn tick(&self, elapsed: f32) -> DispatchResult<TickSummary> {
        if self.inner.ticking.replace(true) {
            return Err(DispatchError::ReentrantTick);
        }
        let _guard = TickGuard(&self.inner.ticking);

        let dt = if !elapsed.is_finite() || elapsed < 0.0 {
            log::warn!("tick elapsed {elapsed} is not a non-negative number, using 0");
            0.0
        } else {
            elapsed
        };

        self.inner.state_mut().stats.ticks += 1;

        let mut summary = TickSummary::default();
        let cfg = &self.inner.config;

        self.run_fixed(dt, &mut summary)?;

        self.run_tier(Tier::High, dt, &mut summary)?;

        if let Some(acc) = self.advance_timer(Tier::Medium, dt) {
            let unit_dt = match cfg.delta_mode {
                DeltaMode::Frame => dt,
                DeltaMode::Accumulated => acc,
            };
            self.run_tier(Tier::Medium, unit_dt, &mut summary)?;
            self.inner.state_mut().medium_timer = 0.0;
            summary.medium_ran = true;
        }

        if let Some(acc) = self.advance_timer(Tier::Low, dt) {
            let unit_dt = match cfg.delta_mode {
                DeltaMode::Frame => dt,
                DeltaMode::Accumulated => acc,
            };
            self.run_tier(Tier::Low, unit_dt, &mut summary)?;
            self.inner.state_mut().low_timer = 0.0;
            summary.low_ran = true;
        }

        let late = self.run_slot::<dyn LateUpdatable>(Slot::Late, dt, &mut summary)?;
        if late > 0 {
            self.inner.state_mut().stats.late_runs += 1;
        }

        Ok(summary)
    }

    /// Adds `dt` to the tier's accumulator. Returns the accumulated value when
    /// the tier is due.
    fn advance_timer(&self, tier: Tier, dt: f32) -> Option<f32> {
        let cfg = &self.inner.config;
        let mut st = self.inner.state_mut();
        let (timer, threshold) = match tier {
            Tier::Medium => (&mut st.medium_timer, cfg.medium_interval_sec),
            Tier::Low => (&mut st.low_timer, cfg.low_interval_sec),
            Tier::High => return Some(dt),
        };
        *timer += dt;
        (*timer >= threshold).then_some(*timer)
    }

    fn run_fixed(&self, dt: f32, summary: &mut TickSummary) -> DispatchResult<()> {
        let Some(step) = self.inner.config.fixed_dt_sec() else {
            return Ok(());
        };
        let cap = self.inner.config.max_fixed_steps_per_tick;

        self.inner.state_mut().fixed_acc += dt;

        let mut steps = 0u32;
        loop {
            {
                let mut st = self.inner.state_mut();
                if st.fixed_acc < step {
                    break;
                }
                if steps >= cap {
                    st.fixed_acc = 0.0;
                    log::warn!("fixed step cap reached ({cap} steps), dropping remainder");
                    break;
                }
                st.fixed_acc -= step;
            }

            self.run_slot::<dyn FixedUpdatable>(Slot::Fixed, step, summary)?;

            steps += 1;
            summary.fixed_steps = steps;
            self.inner.state_mut().stats.fixed_steps += 1;
        }
        Ok(())
    }

    fn run_tier(&self, tier: Tier, dt: f32, summary: &mut TickSummary) -> DispatchResult<()> {
        let t0 = Instant::now();
        let invoked = self.run_slot::<dyn Updatable>(Slot::Tier(tier), dt, summary)?;
        let dur = t0.elapsed();

        log::trace!("{tier} tier ran {invoked} unit(s) dt={dt:.4} in {dur:?}");
        self.inner
            .state_mut()
            .stats
            .record_tier(tier, invoked, dur);
        Ok(())
    }

    /// Walks a snapshot of `slot`'s sequence. Returns the number of units invoked.
    fn run_slot<U: Channel + ?Sized>(
        &self,
        slot: Slot,
        dt: f32,
        summary: &mut TickSummary,
    ) -> DispatchResult<usize> {
        let snapshot = {
            let mut st = self.inner.state_mut();
            match U::list(&mut st, slot) {
                Some(list) => list.snapshot(),
                None => return Ok(0),
            }
        };

        let mut invoked = 0usize;

        for entry in snapshot {
            let unit = {
                let mut st = self.inner.state_mut();
                let live = U::list(&mut st, slot).is_some_and(|l| l.contains_id(entry.id));
                if !live {
                    continue;
                }
                match entry.unit.upgrade() {
                    Some(unit) => unit,
                    None => {
                        if let Some(list) = U::list(&mut st, slot) {
                            list.remove_id(entry.id);
                        }
                        st.stats.pruned += 1;
                        log::debug!("pruned dropped unit from {slot}");
                        continue;
                    }
                }
            };

            invoked += 1;
            summary.invoked += 1;

            let result = match unit.try_borrow_mut() {
                Ok(mut u) => u
                    .invoke(dt)
                    .map_err(|source| DispatchError::Unit { slot, source }),
                Err(_) => Err(DispatchError::UnitBusy { slot }),
            };

            if let Err(err) = result {
                self.inner.state_mut().stats.failures += 1;
                match self.inner.config.on_unit_error {
                    FailurePolicy::Propagate => {
                        if let Slot::Tier(tier) = slot {
                            self.inner
                                .state_mut()
                                .stats
                                .tier_mut(tier)
                                .invocations += invoked as u64;
                        }
                        return Err(err);
                    }
                    FailurePolicy::LogAndContinue => {
                        match &err {
                            DispatchError::Unit { source, .. } => log::error!("{err}: {source:#}"),
                            _ => log::error!("{err}"),
                        }
                        summary.failures += 1;
                    }
                }
            }
        }

        Ok(invoked)
    }
}

impl Inner {
    #[inline]
    fn state_mut(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    fn push_tier(&self, unit: &Rc<RefCell<dyn Updatable>>, tier: Tier) -> DispatchResult<u64> {
        let addr = addr_of(unit);
        let mut st = self.state_mut();

        if self.config.duplicates == DuplicatePolicy::Reject {
            if let Some(existing) = Tier::ALL
                .into_iter()
                .find(|t| st.tiers[t.index()].contains_addr(addr))
            {
                return Err(DispatchError::AlreadyRegistered {
                    slot: Slot::Tier(existing),
                });
            }
        }

        let id = st.alloc_id();
        let list = &mut st.tiers[tier.index()];
        list.entries.push(Entry {
            id,
            addr,
            unit: Rc::downgrade(unit),
        });
        log::debug!("unit registered in {tier} tier (count={})", list.len());
        Ok(id)
    }

    /// Appends to the fixed or late sequence. Duplicates are checked within
    /// that sequence only.
    fn push_channel<U: ?Sized>(
        &self,
        unit: &Rc<RefCell<U>>,
        slot: Slot,
        select: impl Fn(&mut State) -> &mut UnitList<U>,
    ) -> DispatchResult<u64> {
        let addr = addr_of(unit);
        let mut st = self.state_mut();

        if self.config.duplicates == DuplicatePolicy::Reject && select(&mut *st).contains_addr(addr) {
            return Err(DispatchError::AlreadyRegistered { slot });
        }
        let id = st.alloc_id();
        let list = select(&mut *st);
        list.entries.push(Entry {
            id,
            addr,
            unit: Rc::downgrade(unit),
        });
        log::debug!("unit registered on {slot} channel (count={})", list.len());
        Ok(id)
    }

    pub(crate) fn has_entry(&self, slot: Slot, id: u64) -> bool {
        let st = self.state.borrow();
        match slot {
            Slot::Tier(t) => st.tiers[t.index()].contains_id(id),
            Slot::Fixed => st.fixed.contains_id(id),
            Slot::Late => st.late.contains_id(id),
        }
    }

    /// Removes one exact registration. Used by scoped guards.
    pub(crate) fn remove_entry(&self, slot: Slot, id: u64) -> bool {
        let mut st = self.state_mut();
        match slot {
            Slot::Tier(t) => st.tiers[t.index()].remove_id(id),
            Slot::Fixed => st.fixed.remove_id(id),
            Slot::Late => st.late.remove_id(id),
        }
    }
}

impl State {
    #[inline]
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}

impl fmt::Debug for UpdateDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("UpdateDispatcher")
            .field("high", &st.tiers[0].len())
            .field("medium", &st.tiers[1].len())
            .field("low", &st.tiers[2].len())
            .field("fixed", &st.fixed.len())
            .field("late", &st.late.len())
            .field("medium_timer", &st.medium_timer)
            .field("low_timer", &st.low_timer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::FnUnit;
    use std::time::{Duration, Instant};

    type Log = Rc<RefCell<Vec<(&'static str, f32)>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl Updatable for Recorder {
        fn on_update(&mut self, dt: f32) -> anyhow::Result<()> {
            self.log.borrow_mut().push((self.name, dt));
            Ok(())
        }
    }

    impl FixedUpdatable for Recorder {
        fn on_fixed_update(&mut self, fixed_dt: f32) -> anyhow::Result<()> {
            self.log.borrow_mut().push((self.name, fixed_dt));
            Ok(())
        }
    }

    impl LateUpdatable for Recorder {
        fn on_late_update(&mut self, dt: f32) -> anyhow::Result<()> {
            self.log.borrow_mut().push((self.name, dt));
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Log) -> Rc<RefCell<Recorder>> {
        Rc::new(RefCell::new(Recorder { name, log: log.clone() }))
    }

    fn names(log: &Log) -> Vec<&'static str> {
        log.borrow().iter().map(|(n, _)| *n).collect()
    }

    fn tiers_only(cfg: DispatcherConfig) -> UpdateDispatcher {
        UpdateDispatcher::new(cfg.with_fixed_hz(0)).unwrap()
    }

    #[test]
    fn rejects_duplicates_across_tiers_by_default() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let a = recorder("a", &log);

        d.register(&a, Tier::Medium).unwrap();
        let err = d.register(&a, Tier::Medium).unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyRegistered { slot: Slot::Tier(Tier::Medium) }));

        let err = d.register(&a, Tier::High).unwrap_err();
        assert_eq!(err.tier(), Some(Tier::Medium));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn allowed_duplicates_run_twice_and_unregister_one_at_a_time() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default().with_duplicates(DuplicatePolicy::Allow));
        let a = recorder("a", &log);

        d.register(&a, Tier::High).unwrap();
        d.register(&a, Tier::High).unwrap();
        d.tick(0.01).unwrap();
        assert_eq!(names(&log), ["a", "a"]);

        d.unregister(&a);
        assert_eq!(d.tier_len(Tier::High), 1);
        d.unregister(&a);
        assert!(d.is_empty());
    }

    #[test]
    fn unregister_searches_high_before_low() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default().with_duplicates(DuplicatePolicy::Allow));
        let a = recorder("a", &log);

        d.register(&a, Tier::Low).unwrap();
        d.register(&a, Tier::High).unwrap();

        d.unregister(&a);
        assert_eq!(d.tier_of(&a), Some(Tier::Low));
        assert_eq!(d.tier_len(Tier::High), 0);
    }

    #[test]
    fn accumulated_mode_passes_tier_interval() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default().with_delta_mode(DeltaMode::Accumulated));
        let m = recorder("m", &log);
        let h = recorder("h", &log);
        d.register(&m, Tier::Medium).unwrap();
        d.register(&h, Tier::High).unwrap();

        d.tick(0.05).unwrap();
        d.tick(0.05).unwrap();
        d.tick(0.05).unwrap();

        let got: Vec<f32> = log
            .borrow()
            .iter()
            .filter(|(n, _)| *n == "m")
            .map(|(_, dt)| *dt)
            .collect();
        assert_eq!(got.len(), 1);
        assert!((got[0] - 0.15).abs() < 1e-5);

        // High still sees the frame's elapsed time.
        assert!(log.borrow().iter().filter(|(n, _)| *n == "h").all(|(_, dt)| *dt == 0.05));
    }

    #[test]
    fn custom_intervals() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default().with_intervals(0.5, 0.9));
        let m = recorder("m", &log);
        let l = recorder("l", &log);
        d.register(&m, Tier::Medium).unwrap();
        d.register(&l, Tier::Low).unwrap();

        for _ in 0..4 {
            d.tick(0.2).unwrap();
        }
        assert_eq!(names(&log), ["m"]);
        d.tick(0.2).unwrap();
        assert_eq!(names(&log), ["m", "l"]);
    }

    #[test]
    fn negative_and_nan_elapsed_do_not_move_timers_backwards() {
        let d = tiers_only(DispatcherConfig::default());
        d.tick(0.1).unwrap();
        d.tick(-5.0).unwrap();
        d.tick(f32::NAN).unwrap();
        assert!((d.medium_timer() - 0.1).abs() < 1e-6);
        assert!((d.low_timer() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn propagate_aborts_rest_of_tick() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let a = recorder("a", &log);
        let boom = Rc::new(RefCell::new(FnUnit::new(|_dt| anyhow::bail!("boom"))));
        let b = recorder("b", &log);
        let m = recorder("m", &log);

        d.register(&a, Tier::High).unwrap();
        d.register(&boom, Tier::High).unwrap();
        d.register(&b, Tier::High).unwrap();
        d.register(&m, Tier::Medium).unwrap();

        let err = d.tick(0.2).unwrap_err();
        match &err {
            DispatchError::Unit { slot, source } => {
                assert_eq!(*slot, Slot::Tier(Tier::High));
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(names(&log), ["a"]);
        assert_eq!(d.stats().failures, 1);

        // The dispatcher stays usable after a failed tick.
        d.unregister(&boom);
        d.tick(0.2).unwrap();
        assert_eq!(names(&log), ["a", "a", "b", "m"]);
    }

    #[test]
    fn failed_medium_tier_keeps_its_timer() {
        let d = tiers_only(DispatcherConfig::default());
        let boom = Rc::new(RefCell::new(FnUnit::new(|_dt| anyhow::bail!("boom"))));
        d.register(&boom, Tier::Medium).unwrap();

        assert!(d.tick(0.2).is_err());
        assert!((d.medium_timer() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn log_and_continue_runs_everyone() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default().with_failure_policy(FailurePolicy::LogAndContinue));
        let boom = Rc::new(RefCell::new(FnUnit::new(|_dt| anyhow::bail!("boom"))));
        let a = recorder("a", &log);
        let m = recorder("m", &log);

        d.register(&boom, Tier::High).unwrap();
        d.register(&a, Tier::High).unwrap();
        d.register(&m, Tier::Medium).unwrap();

        let s = d.tick(0.2).unwrap();
        assert_eq!(s.failures, 1);
        assert_eq!(s.invoked, 3);
        assert!(s.medium_ran);
        assert_eq!(names(&log), ["a", "m"]);
        assert_eq!(d.medium_timer(), 0.0);
    }

    #[test]
    fn borrowed_unit_is_reported_busy() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let a = recorder("a", &log);
        d.register(&a, Tier::High).unwrap();

        let held = a.borrow_mut();
        let err = d.tick(0.01).unwrap_err();
        assert!(matches!(err, DispatchError::UnitBusy { slot: Slot::Tier(Tier::High) }));
        drop(held);

        d.tick(0.01).unwrap();
        assert_eq!(names(&log), ["a"]);
    }

    #[test]
    fn dropped_units_are_pruned() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let a = recorder("a", &log);
        let b = recorder("b", &log);
        d.register(&a, Tier::High).unwrap();
        d.register(&b, Tier::High).unwrap();

        drop(a);
        d.tick(0.01).unwrap();

        assert_eq!(names(&log), ["b"]);
        assert_eq!(d.tier_len(Tier::High), 1);
        assert_eq!(d.stats().pruned, 1);
    }

    #[test]
    fn unit_can_unregister_itself_and_a_later_peer() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let b = recorder("b", &log);
        let c = recorder("c", &log);

        let slot: Rc<RefCell<Option<Rc<RefCell<dyn Updatable>>>>> = Rc::default();
        let (dh, bh, lh, sh) = (d.clone(), b.clone(), log.clone(), slot.clone());
        let a = Rc::new(RefCell::new(FnUnit::new(move |dt| {
            lh.borrow_mut().push(("a", dt));
            dh.unregister(&bh);
            if let Some(me) = sh.borrow().as_ref() {
                dh.unregister(me);
            }
            Ok(())
        })));
        *slot.borrow_mut() = Some(a.clone());

        d.register(&a, Tier::High).unwrap();
        d.register(&b, Tier::High).unwrap();
        d.register(&c, Tier::High).unwrap();

        d.tick(0.01).unwrap();
        assert_eq!(names(&log), ["a", "c"]);

        d.tick(0.01).unwrap();
        assert_eq!(names(&log), ["a", "c", "c"]);
    }

    #[test]
    fn units_added_mid_walk_run_next_tick() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let late_joiner = recorder("z", &log);

        let (dh, zh, lh) = (d.clone(), late_joiner.clone(), log.clone());
        let spawner = Rc::new(RefCell::new(FnUnit::new(move |dt| {
            lh.borrow_mut().push(("s", dt));
            if !dh.contains(&zh) {
                dh.register(&zh, Tier::High)?;
            }
            Ok(())
        })));
        d.register(&spawner, Tier::High).unwrap();

        d.tick(0.01).unwrap();
        assert_eq!(names(&log), ["s"]);

        d.tick(0.01).unwrap();
        assert_eq!(names(&log), ["s", "s", "z"]);
    }

    #[test]
    fn tick_from_callback_is_rejected() {
        let d = tiers_only(DispatcherConfig::default());
        let seen: Rc<RefCell<Option<bool>>> = Rc::default();

        let (dh, seen_h) = (d.clone(), seen.clone());
        let nested = Rc::new(RefCell::new(FnUnit::new(move |dt| {
            let reentrant = matches!(dh.tick(dt), Err(DispatchError::ReentrantTick));
            *seen_h.borrow_mut() = Some(reentrant);
            Ok(())
        })));
        d.register(&nested, Tier::High).unwrap();

        d.tick(0.01).unwrap();
        assert_eq!(*seen.borrow(), Some(true));

        // The flag is cleared once the outer tick returns.
        d.tick(0.01).unwrap();
    }

    #[test]
    fn fixed_steps_run_before_tiers_and_late_after() {
        let log = Log::default();
        let d = UpdateDispatcher::new(DispatcherConfig::default().with_fixed_hz(10)).unwrap();
        let f = recorder("f", &log);
        let h = recorder("h", &log);
        let late = recorder("late", &log);
        d.register_fixed(&f).unwrap();
        d.register(&h, Tier::High).unwrap();
        d.register_late(&late).unwrap();

        let s = d.tick(0.25).unwrap();
        assert_eq!(s.fixed_steps, 2);
        assert_eq!(names(&log), ["f", "f", "h", "late"]);
        assert!(log.borrow()[..2].iter().all(|(_, dt)| (*dt - 0.1).abs() < 1e-6));
        assert!((d.fixed_accumulator() - 0.05).abs() < 1e-5);

        d.tick(0.06).unwrap();
        assert_eq!(names(&log), ["f", "f", "h", "late", "f", "h", "late"]);
    }

    #[test]
    fn fixed_step_cap_drops_remainder() {
        let log = Log::default();
        let mut cfg = DispatcherConfig::default().with_fixed_hz(100);
        cfg.max_fixed_steps_per_tick = 3;
        let d = UpdateDispatcher::new(cfg).unwrap();
        let f = recorder("f", &log);
        d.register_fixed(&f).unwrap();

        let s = d.tick(1.0).unwrap();
        assert_eq!(s.fixed_steps, 3);
        assert_eq!(d.fixed_accumulator(), 0.0);
        assert_eq!(d.stats().fixed_steps, 3);
    }

    #[test]
    fn fixed_and_late_unregister() {
        let log = Log::default();
        let d = UpdateDispatcher::new(DispatcherConfig::default().with_fixed_hz(10)).unwrap();
        let p = recorder("p", &log);
        d.register_fixed(&p).unwrap();
        d.register_late(&p).unwrap();
        assert!(matches!(
            d.register_late(&p),
            Err(DispatchError::AlreadyRegistered { slot: Slot::Late })
        ));

        d.unregister_fixed(&p);
        d.unregister_late(&p);
        d.unregister_late(&p);
        assert_eq!(d.fixed_len() + d.late_len(), 0);

        d.tick(0.5).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn scoped_registration_unregisters_on_drop() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let a = recorder("a", &log);

        let reg = d.register_scoped(&a, Tier::Low).unwrap();
        assert_eq!(reg.slot(), Slot::Tier(Tier::Low));
        assert!(reg.is_active());
        assert_eq!(d.tier_of(&a), Some(Tier::Low));

        drop(reg);
        assert!(!d.contains(&a));

        let reg = d.register_scoped(&a, Tier::High).unwrap();
        reg.forget();
        assert_eq!(d.tier_of(&a), Some(Tier::High));
    }

    #[test]
    fn fixed_duplicates_follow_policy() {
        let log = Log::default();
        let d = UpdateDispatcher::new(DispatcherConfig::default().with_fixed_hz(10)).unwrap();
        let p = recorder("p", &log);
        d.register_fixed(&p).unwrap();
        assert!(matches!(
            d.register_fixed(&p),
            Err(DispatchError::AlreadyRegistered { slot: Slot::Fixed })
        ));
        assert_eq!(d.fixed_len(), 1);

        let log = Log::default();
        let d = UpdateDispatcher::new(
            DispatcherConfig::default()
                .with_fixed_hz(10)
                .with_duplicates(DuplicatePolicy::Allow),
        )
        .unwrap();
        let p = recorder("p", &log);
        d.register_fixed(&p).unwrap();
        d.register_fixed(&p).unwrap();

        let s = d.tick(0.15).unwrap();
        assert_eq!(s.fixed_steps, 1);
        assert_eq!(names(&log), ["p", "p"]);

        d.unregister_fixed(&p);
        assert_eq!(d.fixed_len(), 1);
    }

    #[test]
    fn scoped_fixed_and_late_registrations() {
        let log = Log::default();
        let d = UpdateDispatcher::new(DispatcherConfig::default().with_fixed_hz(10)).unwrap();
        let p = recorder("p", &log);

        let fixed = d.register_fixed_scoped(&p).unwrap();
        let late = d.register_late_scoped(&p).unwrap();
        assert_eq!(fixed.slot(), Slot::Fixed);
        assert_eq!(late.slot(), Slot::Late);
        assert!(fixed.is_active() && late.is_active());
        assert!(matches!(
            d.register_late_scoped(&p),
            Err(DispatchError::AlreadyRegistered { slot: Slot::Late })
        ));

        d.tick(0.15).unwrap();
        assert_eq!(names(&log), ["p", "p"]);

        drop(fixed);
        assert_eq!(d.fixed_len(), 0);
        assert_eq!(d.late_len(), 1);

        d.unregister_late(&p);
        assert!(!late.is_active());
        drop(late);

        d.tick(0.1).unwrap();
        assert_eq!(names(&log), ["p", "p"]);
    }

    #[test]
    fn late_runs_counts_only_ticks_with_late_units() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let p = recorder("p", &log);

        d.tick(0.01).unwrap();
        d.tick(0.01).unwrap();
        assert_eq!(d.stats().late_runs, 0);

        d.register_late(&p).unwrap();
        d.tick(0.01).unwrap();
        assert_eq!(d.stats().late_runs, 1);
        assert_eq!(d.stats().ticks, 3);
    }

    #[test]
    fn unit_failure_reports_its_cause_once() {
        let d = tiers_only(DispatcherConfig::default());
        let boom = Rc::new(RefCell::new(FnUnit::new(|_dt| anyhow::bail!("boom"))));
        d.register(&boom, Tier::High).unwrap();

        let err = anyhow::Error::from(d.tick(0.01).unwrap_err());
        assert_eq!(format!("{err:#}"), "unit failed during tier:high update: boom");
    }

    #[test]
    fn ids_stay_ordered_under_churn() {
        let d = tiers_only(DispatcherConfig::default());
        let units: Vec<_> = (0..64)
            .map(|_| Rc::new(RefCell::new(FnUnit::new(|_dt| Ok(())))))
            .collect();

        for (i, u) in units.iter().enumerate() {
            d.register(u, Tier::High).unwrap();
            if i % 3 == 0 {
                d.unregister(&units[i / 2]);
            }
        }
        for u in units.iter().step_by(5) {
            d.unregister(u);
            d.register(u, Tier::High).unwrap();
        }

        let st = d.inner.state.borrow();
        let ids: Vec<u64> = st.tiers[Tier::High.index()].entries.iter().map(|e| e.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for id in &ids {
            assert!(st.tiers[Tier::High.index()].contains_id(*id));
        }
    }

    #[test]
    fn tier_walk_scales_linearly() {
        fn best_tick(units: usize) -> Duration {
            let d = tiers_only(DispatcherConfig::default());
            let keep: Vec<_> = (0..units)
                .map(|_| Rc::new(RefCell::new(FnUnit::new(|_dt| Ok(())))))
                .collect();
            for u in &keep {
                d.register(u, Tier::High).unwrap();
            }
            (0..5)
                .map(|_| {
                    let t0 = Instant::now();
                    d.tick(0.016).unwrap();
                    t0.elapsed()
                })
                .min()
                .unwrap()
        }

        let small = best_tick(4_000);
        let large = best_tick(16_000);
        let ratio = large.as_secs_f64() / small.as_secs_f64().max(1e-9);
        assert!(ratio < 8.0, "4x units took {ratio:.1}x longer");
    }

    #[test]
    fn scoped_registration_outliving_dispatcher_is_harmless() {
        let log = Log::default();
        let a = recorder("a", &log);
        let reg = {
            let d = tiers_only(DispatcherConfig::default());
            d.register_scoped(&a, Tier::High).unwrap()
        };
        assert!(!reg.is_active());
        drop(reg);
    }

    #[test]
    fn stats_track_tier_runs() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let h = recorder("h", &log);
        let m = recorder("m", &log);
        let l = recorder("l", &log);
        d.register(&h, Tier::High).unwrap();
        d.register(&m, Tier::Medium).unwrap();
        d.register(&l, Tier::Low).unwrap();

        for _ in 0..8 {
            d.tick(0.1).unwrap();
        }

        let st = d.stats();
        assert_eq!(st.ticks, 8);
        assert_eq!(st.tier(Tier::High).runs, 8);
        assert_eq!(st.tier(Tier::Medium).invocations, 4);
        assert_eq!(st.tier(Tier::Low).invocations, 2);
        assert_eq!(st.late_runs, 0);

        d.reset_stats();
        assert_eq!(d.stats(), DispatchStats::default());
    }

    #[test]
    fn clear_drops_every_registration() {
        let log = Log::default();
        let d = tiers_only(DispatcherConfig::default());
        let a = recorder("a", &log);
        d.register(&a, Tier::High).unwrap();
        d.register_late(&a).unwrap();

        d.clear();
        assert!(d.is_empty());
        assert_eq!(d.late_len(), 0);
        assert!(format!("{d:?}").contains("high: 0"));
    }

    #[test]
    fn rejects_invalid_config() {
        let err = UpdateDispatcher::new(DispatcherConfig::default().with_intervals(-1.0, 0.4)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
