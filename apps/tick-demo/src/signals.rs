use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Ctrl-C / SIGINT.
    Interrupted,
    /// Asked for by code.
    Requested,
}

const RUNNING: u8 = 0;
const INTERRUPTED: u8 = 1;
const REQUESTED: u8 = 2;

/// Cooperative exit flag shared between the Ctrl-C handler and the frame loop.
///
/// The first reason recorded wins.
#[derive(Clone, Default)]
pub struct ExitSignal {
    state: Arc<AtomicU8>,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn request_exit(&self) {
        self.set(REQUESTED);
    }

    #[inline]
    pub fn reason(&self) -> Option<ExitReason> {
        match self.state.load(Ordering::Relaxed) {
            INTERRUPTED => Some(ExitReason::Interrupted),
            REQUESTED => Some(ExitReason::Requested),
            _ => None,
        }
    }

    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let s = self.clone();
        ctrlc::set_handler(move || s.set(INTERRUPTED))
    }

    fn set(&self, code: u8) {
        let _ = self
            .state
            .compare_exchange(RUNNING, code, Ordering::Relaxed, Ordering::Relaxed);
    }
}
