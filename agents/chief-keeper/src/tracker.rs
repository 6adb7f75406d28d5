use ethers::types::{Address, U256};
use tracing::{debug, info};

use crate::chain::{Candidate, ChainClient, ChainResult};

/// A candidate that should replace the current hat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftDecision {
    pub candidate: Candidate,
    pub hat: Candidate,
}

impl LiftDecision {
    pub fn address(&self) -> Address {
        self.candidate.address
    }

    pub fn weight_delta(&self) -> U256 {
        self.candidate
            .approval_weight
            .saturating_sub(self.hat.approval_weight)
    }
}

/// Decides whether the hat should be lifted, and to whom.
#[derive(Debug, Default, Clone, Copy)]
pub struct CandidateTracker;

impl CandidateTracker {
    /// Reads the hat and candidate weights and returns the candidate to lift,
    /// if any. Never writes to the chain.
    ///
    /// The hat is read once and handed to the weight query.
    pub async fn decide(&self, client: &dyn ChainClient) -> ChainResult<Option<LiftDecision>> {
        let hat = client.get_hat().await?.current_hat;
        let candidates = client.get_candidate_weights(hat).await?;

        let decision = select_lift(hat, &candidates);
        match &decision {
            Some(decision) => info!(
                candidate = ?decision.candidate.address,
                candidate_weight = %decision.candidate.approval_weight,
                hat = ?decision.hat.address,
                hat_weight = %decision.hat.approval_weight,
                weight_delta = %decision.weight_delta(),
                "Lifting hat"
            ),
            None => debug!(?hat, candidates = candidates.len(), "Hat holds the most approvals"),
        }
        Ok(decision)
    }
}

/// Picks the first candidate with the highest weight, in reported order, and
/// returns it only if it strictly outweighs the hat. A hat that is not among
/// the reported candidates counts as having no approvals.
pub fn select_lift(hat: Address, candidates: &[Candidate]) -> Option<LiftDecision> {
    let hat = candidates
        .iter()
        .find(|candidate| candidate.address == hat)
        .copied()
        .unwrap_or_else(|| Candidate::new(hat, U256::zero()));

    let top = candidates.iter().fold(None::<&Candidate>, |top, candidate| match top {
        Some(top) if top.approval_weight >= candidate.approval_weight => Some(top),
        _ => Some(candidate),
    })?;

    if top.address == hat.address || top.approval_weight <= hat.approval_weight {
        return None;
    }
    Some(LiftDecision {
        candidate: *top,
        hat,
    })
}

#[cfg(test)]
mod tests {
    use ethers::types::H160;
    use mockall::predicate::eq;

    use crate::chain::HatState;
    use crate::test_utils::MockChief;

    use super::*;

    fn addr(n: u64) -> H160 {
        H160::from_low_u64_be(n)
    }

    fn candidate(n: u64, weight: u64) -> Candidate {
        Candidate::new(addr(n), U256::from(weight))
    }

    #[test]
    fn lifts_heavier_candidate() {
        let decision = select_lift(addr(0xa), &[candidate(0xa, 100), candidate(0xb, 150)]).unwrap();
        assert_eq!(decision.address(), addr(0xb));
        assert_eq!(decision.hat, candidate(0xa, 100));
        assert_eq!(decision.weight_delta(), U256::from(50));
    }

    #[test]
    fn no_lift_when_hat_is_top() {
        assert_eq!(
            select_lift(addr(0xa), &[candidate(0xa, 300), candidate(0xb, 150)]),
            None
        );
    }

    #[test]
    fn no_lift_on_tie_with_hat() {
        assert_eq!(
            select_lift(addr(0xa), &[candidate(0xa, 150), candidate(0xb, 150)]),
            None
        );
    }

    #[test]
    fn ties_between_challengers_keep_reported_order() {
        let decision = select_lift(
            addr(0xa),
            &[candidate(0xa, 10), candidate(0xc, 150), candidate(0xb, 150)],
        )
        .unwrap();
        assert_eq!(decision.address(), addr(0xc));
    }

    #[test]
    fn missing_hat_counts_as_zero() {
        let decision = select_lift(addr(0xa), &[candidate(0xb, 1)]).unwrap();
        assert_eq!(decision.address(), addr(0xb));
        assert_eq!(decision.hat, candidate(0xa, 0));
    }

    #[test]
    fn nothing_to_lift_without_candidates() {
        assert_eq!(select_lift(addr(0xa), &[]), None);
        assert_eq!(select_lift(addr(0xa), &[candidate(0xb, 0)]), None);
    }

    #[tokio::test]
    async fn decide_reads_hat_once_and_passes_it_on() {
        let mut chief = MockChief::new();
        chief
            .expect_get_hat()
            .times(1)
            .returning(|| Ok(HatState::new(addr(0xa))));
        chief
            .expect_get_candidate_weights()
            .with(eq(addr(0xa)))
            .times(1)
            .returning(|_| Ok(vec![candidate(0xa, 100), candidate(0xb, 150)]));
        chief.expect_submit_signed_transaction().never();

        let decision = CandidateTracker.decide(&chief).await.unwrap().unwrap();
        assert_eq!(decision.address(), addr(0xb));
    }

    #[tokio::test]
    async fn decide_propagates_chain_errors() {
        let mut chief = MockChief::new();
        chief.expect_get_hat().returning(|| {
            Err(crate::chain::ChainCommunicationError::RpcError(
                "connection reset".to_owned(),
            ))
        });

        assert!(CandidateTracker.decide(&chief).await.is_err());
    }
}
