use std::rc::Weak;

use crate::dispatcher::Inner;
use crate::tier::Slot;

/// Scoped registration handle.
/// On drop, automatically unregisters the unit it was created for.
///
/// The guard does not keep the dispatcher alive; dropping it after the
/// dispatcher is gone does nothing.
#[must_use = "dropping a Registration unregisters the unit immediately"]
pub struct Registration {
    dispatcher: Weak<Inner>,
    slot: Slot,
    id: u64,
}

impl Registration {
    #[inline]
    pub(crate) fn new(dispatcher: Weak<Inner>, slot: Slot, id: u64) -> Self {
        Self { dispatcher, slot, id }
    }

    #[inline]
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Whether the registration is still present in the dispatcher.
    pub fn is_active(&self) -> bool {
        self.dispatcher
            .upgrade()
            .is_some_and(|inner| inner.has_entry(self.slot, self.id))
    }

    /// Detaches the guard. The unit stays registered until it is
    /// unregistered explicitly or dropped.
    #[inline]
    pub fn forget(mut self) {
        self.dispatcher = Weak::new();
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(inner) = self.dispatcher.upgrade() else { return };
        if inner.remove_entry(self.slot, self.id) {
            log::debug!("scoped registration released ({})", self.slot);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("slot", &self.slot)
            .field("id", &self.id)
            .finish()
    }
}
