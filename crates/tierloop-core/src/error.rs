use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tier::{Slot, Tier};

/// Dispatcher error.
///
/// Keep this small and stable. Unit callbacks report their own failures as
/// `anyhow::Error`, which is wrapped into `Unit` with the slot it ran in.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid tier value: '{value}'")]
    InvalidTier { value: String },

    #[error("unit already registered ({slot})")]
    AlreadyRegistered { slot: Slot },

    #[error("unit failed during {slot} update")]
    Unit {
        slot: Slot,
        #[source]
        source: anyhow::Error,
    },

    #[error("unit is already borrowed, cannot run its {slot} update")]
    UnitBusy { slot: Slot },

    #[error("tick called from inside a unit callback")]
    ReentrantTick,
}

impl DispatchError {
    /// The tier of a failed unit, when it ran in one.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            DispatchError::AlreadyRegistered { slot }
            | DispatchError::Unit { slot, .. }
            | DispatchError::UnitBusy { slot } => match slot {
                Slot::Tier(t) => Some(*t),
                _ => None,
            },
            _ => None,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
