use ::bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fee rate in satoshis per virtual byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const fn from_sat_per_vb(sat_per_vb: u64) -> Self {
        Self(sat_per_vb)
    }

    pub fn sat_per_vb(&self) -> u64 {
        self.0
    }

    pub fn fee_for_vsize(&self, vsize: usize) -> Amount {
        Amount::from_sat(self.0 * vsize as u64)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/vB", self.0)
    }
}

/// Confirmation target for a sweep, downgraded to `default_target` when the
/// timeout is no more than `urgency_delta` blocks away. Close to the timeout
/// a leisurely target risks the counterparty reclaiming the lockup first.
pub fn sweep_conf_target(
    remaining_blocks: u32,
    configured_target: u32,
    default_target: u32,
    urgency_delta: u32,
) -> u32 {
    if remaining_blocks <= urgency_delta && configured_target > default_target {
        default_target
    } else {
        configured_target
    }
}

/// What to do with a claim transaction whose fee at the estimated rate was
/// computed against the operator's cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFeeDecision {
    /// Fee fits under the cap, publish at the estimated rate.
    Publish(FeeRate),
    /// Fee exceeds the cap but the preimage is already public; publish at the
    /// highest rate the cap allows.
    PublishAtCap(FeeRate),
    /// Fee exceeds the cap and nothing forces our hand yet; wait for the next
    /// tick.
    Defer,
}

pub fn claim_fee_decision(
    estimated_rate: FeeRate,
    claim_vsize: usize,
    max_miner_fee: Amount,
    preimage_revealed: bool,
) -> ClaimFeeDecision {
    let estimated_fee = estimated_rate.fee_for_vsize(claim_vsize);

    if max_miner_fee > estimated_fee {
        return ClaimFeeDecision::Publish(estimated_rate);
    }

    if preimage_revealed {
        let capped = FeeRate::from_sat_per_vb(max_miner_fee.as_sat() / claim_vsize as u64);
        return ClaimFeeDecision::PublishAtCap(capped);
    }

    ClaimFeeDecision::Defer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_downgraded_close_to_timeout() {
        assert_eq!(sweep_conf_target(18, 30, 9, 18), 9);
        assert_eq!(sweep_conf_target(5, 30, 9, 18), 9);
    }

    #[test]
    fn target_is_kept_when_timeout_is_far() {
        assert_eq!(sweep_conf_target(19, 30, 9, 18), 30);
        assert_eq!(sweep_conf_target(100, 30, 9, 18), 30);
    }

    #[test]
    fn target_below_default_is_never_raised() {
        assert_eq!(sweep_conf_target(5, 3, 9, 18), 3);
    }

    #[test]
    fn fee_under_cap_publishes_at_estimate() {
        let decision = claim_fee_decision(
            FeeRate::from_sat_per_vb(5),
            800,
            Amount::from_sat(20_000),
            false,
        );
        assert_eq!(decision, ClaimFeeDecision::Publish(FeeRate::from_sat_per_vb(5)));
    }

    #[test]
    fn fee_over_cap_defers_before_preimage_reveal() {
        let decision = claim_fee_decision(
            FeeRate::from_sat_per_vb(200),
            800,
            Amount::from_sat(20_000),
            false,
        );
        assert_eq!(decision, ClaimFeeDecision::Defer);
    }

    #[test]
    fn fee_over_cap_bumps_at_cap_after_preimage_reveal() {
        let decision = claim_fee_decision(
            FeeRate::from_sat_per_vb(200),
            800,
            Amount::from_sat(20_000),
            true,
        );
        // floor(20_000 / 800) = 25 sat/vB
        assert_eq!(
            decision,
            ClaimFeeDecision::PublishAtCap(FeeRate::from_sat_per_vb(25))
        );
    }
}
