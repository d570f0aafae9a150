use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Priority bucket controlling how often a unit's update runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Every tick.
    High,
    /// Throttled by the medium interval.
    Medium,
    /// Throttled by the low interval.
    Low,
}

impl Tier {
    /// Search order used by `unregister`.
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Medium, Tier::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Tier::High => 0,
            Tier::Medium => 1,
            Tier::Low => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Tier {
    type Error = DispatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::High),
            1 => Ok(Tier::Medium),
            2 => Ok(Tier::Low),
            other => Err(DispatchError::InvalidTier {
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for Tier {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Tier::High),
            "medium" => Ok(Tier::Medium),
            "low" => Ok(Tier::Low),
            _ => Err(DispatchError::InvalidTier {
                value: s.to_string(),
            }),
        }
    }
}

/// Anything that names a tier.
///
/// `register` accepts raw values (config strings, wire bytes) so that an
/// unknown tier fails the registration instead of silently defaulting.
pub trait IntoTier {
    fn into_tier(self) -> DispatchResult<Tier>;
}

impl IntoTier for Tier {
    #[inline]
    fn into_tier(self) -> DispatchResult<Tier> {
        Ok(self)
    }
}

impl IntoTier for u8 {
    #[inline]
    fn into_tier(self) -> DispatchResult<Tier> {
        Tier::try_from(self)
    }
}

impl IntoTier for &str {
    #[inline]
    fn into_tier(self) -> DispatchResult<Tier> {
        self.parse()
    }
}

impl IntoTier for &String {
    #[inline]
    fn into_tier(self) -> DispatchResult<Tier> {
        self.parse()
    }
}

/// Where a unit lives inside the dispatcher.
///
/// Used for error attribution and logging.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Slot {
    Fixed,
    Tier(Tier),
    Late,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Fixed => f.write_str("fixed"),
            Slot::Tier(t) => write!(f, "tier:{t}"),
            Slot::Late => f.write_str("late"),
        }
    }
}
