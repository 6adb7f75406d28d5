use ethers::types::U256;
use tracing::debug;

const BASIS_POINTS: u64 = 10_000;

/// Pricing for lift submissions and replace-by-fee resubmissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasStrategy {
    /// Added to the network's suggested price on first submission
    margin: U256,
    /// Escalation per resubmission, in basis points
    bump_bps: u64,
    /// No price above this is ever used
    cap: U256,
}

impl GasStrategy {
    /// A strategy adding `margin` to first submissions and escalating by
    /// `bump_bps` basis points, never above `cap`.
    pub fn new(margin: U256, bump_bps: u64, cap: U256) -> Self {
        Self {
            margin,
            bump_bps,
            cap,
        }
    }

    /// `bump_percent` of 12.5 escalates each resubmission by 12.5%.
    pub fn from_percent(margin: U256, bump_percent: f64, cap: U256) -> Self {
        let bump_bps = (bump_percent * 100.0).round().max(1.0) as u64;
        Self::new(margin, bump_bps, cap)
    }

    /// Highest price the strategy ever returns.
    pub fn cap(&self) -> U256 {
        self.cap
    }

    /// Price of a first submission: suggested price plus margin, capped.
    pub fn initial_price(&self, suggested: U256) -> U256 {
        suggested.saturating_add(self.margin).min(self.cap)
    }

    /// Escalated price for replacing a transaction priced at `previous`.
    ///
    /// Always strictly greater than `previous` and never above the cap;
    /// `None` once `previous` has reached the cap.
    pub fn bump(&self, previous: U256) -> Option<U256> {
        if previous >= self.cap {
            return None;
        }
        let bumped = previous
            .saturating_mul(U256::from(BASIS_POINTS.saturating_add(self.bump_bps)))
            .checked_div(U256::from(BASIS_POINTS))
            .unwrap_or(self.cap)
            .max(previous.saturating_add(U256::one()));
        Some(bumped.min(self.cap))
    }

    /// Price for a resubmission: the bumped price, raised to the current
    /// network price if that moved even higher.
    pub fn escalate(&self, previous: U256, suggested: U256) -> Option<U256> {
        let bumped = self.bump(previous)?;
        let escalated = bumped.max(self.initial_price(suggested));
        debug!(
            %previous,
            %suggested,
            %escalated,
            cap = %self.cap,
            "Escalated gas price"
        );
        Some(escalated)
    }
}
