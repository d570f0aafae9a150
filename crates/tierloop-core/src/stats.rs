use std::time::Duration;

use crate::tier::Tier;

/// Outcome of a single `tick`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Fixed steps executed before the tiers.
    pub fixed_steps: u32,
    pub medium_ran: bool,
    pub low_ran: bool,
    /// Callbacks invoked across every channel, failed ones included.
    pub invoked: usize,
    /// Callbacks that failed and were swallowed by `LogAndContinue`.
    pub failures: usize,
}

/// Per-tier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Times the tier's sequence was walked.
    pub runs: u64,
    /// Unit callbacks invoked in this tier.
    pub invocations: u64,
    /// Wall time of the most recent walk.
    pub last_run: Duration,
}

/// Cumulative dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub ticks: u64,
    pub tiers: [TierStats; 3],
    pub fixed_steps: u64,
    /// Ticks on which at least one late unit was invoked.
    pub late_runs: u64,
    pub failures: u64,
    /// Dead units dropped from the sequences.
    pub pruned: u64,
}

impl DispatchStats {
    #[inline]
    pub fn tier(&self, tier: Tier) -> &TierStats {
        &self.tiers[tier.index()]
    }

    #[inline]
    pub(crate) fn tier_mut(&mut self, tier: Tier) -> &mut TierStats {
        &mut self.tiers[tier.index()]
    }

    #[inline]
    pub(crate) fn record_tier(&mut self, tier: Tier, invoked: usize, dur: Duration) {
        let t = self.tier_mut(tier);
        t.runs += 1;
        t.invocations += invoked as u64;
        t.last_run = dur;
    }
}
