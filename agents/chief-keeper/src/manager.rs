use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use tracing::{debug, info, instrument, warn};

use crate::chain::{ChainClient, ChainCommunicationError, SignedTransaction};
use crate::error::KeeperError;
use crate::gas::GasStrategy;
use crate::signer::{LiftRequest, LiftSigner};
use crate::transaction::{BroadcastAttempt, FailureReason, PendingTransaction, TxStatus};

/// Limits on how long a single lift is chased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionConf {
    /// Blocks without inclusion after which a broadcast counts as stuck
    pub stuck_threshold_blocks: u64,
    /// Broadcasts allowed per lift, the first one included
    pub max_attempts: u32,
}

/// What a call to [`TransactionManager::poll`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not mined yet, and not stuck
    Pending,
    /// Mined successfully, waiting for the block to stay canonical
    Included { block_number: u64 },
    /// The including block is still canonical. The lift is done.
    Finalized,
    /// Rebroadcast with the same nonce at a higher price
    Resubmitted { gas_price: U256 },
    /// An unanswered broadcast was sent again unchanged
    Rebroadcast,
    /// The including block was replaced and the lift is pending again
    Reorged,
    Failed(FailureReason),
}

/// How the node answered a broadcast.
#[derive(Debug)]
enum Delivery {
    Accepted,
    /// Some transaction with this nonce already made it on chain
    NonceConsumed,
    Rejected(ChainCommunicationError),
    /// No usable answer; the node may have taken the transaction
    Unacknowledged(ChainCommunicationError),
}

/// Owns the single lift transaction the keeper has in flight.
#[derive(Debug)]
pub struct TransactionManager {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn LiftSigner>,
    gas: GasStrategy,
    conf: SubmissionConf,
    pending: Option<PendingTransaction>,
}

impl TransactionManager {
    /// A manager with nothing in flight.
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn LiftSigner>,
        gas: GasStrategy,
        conf: SubmissionConf,
    ) -> Self {
        Self {
            client,
            signer,
            gas,
            conf,
            pending: None,
        }
    }

    /// The lift in flight, failed ones included until they are cleared.
    pub fn pending(&self) -> Option<&PendingTransaction> {
        self.pending.as_ref()
    }

    /// Whether a lift is in flight. No new lift is submitted while it is.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Signs and broadcasts a lift of `candidate` with a fresh nonce.
    ///
    /// Refused while another lift is in flight. The lift is recorded before it
    /// is sent and only forgotten again if the node refuses it. When the
    /// node's answer is lost the lift stays in flight and an error is
    /// returned; [`poll`](Self::poll) takes it from there.
    #[instrument(skip(self))]
    pub async fn submit(&mut self, candidate: Address) -> Result<&PendingTransaction, KeeperError> {
        if let Some(pending) = &self.pending {
            return Err(KeeperError::InvalidState(format!(
                "lift of {:?} with nonce {} is still in flight",
                pending.target_candidate, pending.nonce
            )));
        }

        let nonce = self.client.get_nonce(self.signer.address()).await?;
        let head = self.client.get_block_number().await?.block_number;
        let suggested = self.client.suggest_gas_price().await?;
        let gas_price = self.gas.initial_price(suggested);

        let signed = self
            .signer
            .sign_lift(&LiftRequest::new(candidate, nonce, gas_price))
            .await?;
        let tx_hash = signed.tx_hash;
        self.pending = Some(PendingTransaction {
            nonce,
            target_candidate: candidate,
            gas_price,
            submitted_at_block: head,
            tx_hash,
            raw: signed.raw.clone(),
            attempts: 1,
            status: TxStatus::Unacknowledged,
            replaced: vec![],
        });

        match self.deliver(&signed).await {
            Delivery::Accepted => {
                info!(
                    ?candidate,
                    %nonce,
                    %gas_price,
                    ?tx_hash,
                    block_number = head,
                    "Submitted lift"
                );
                let pending = self.in_flight()?;
                pending.status = TxStatus::Submitted;
                Ok(&*pending)
            }
            Delivery::Unacknowledged(err) => {
                warn!(
                    ?candidate,
                    %nonce,
                    ?tx_hash,
                    error = %err,
                    "Lift broadcast unanswered, tracking it anyway"
                );
                Err(KeeperError::TxSubmissionError(err.to_string()))
            }
            Delivery::Rejected(err) => {
                self.pending = None;
                Err(KeeperError::TxSubmissionError(err.to_string()))
            }
            Delivery::NonceConsumed => {
                self.pending = None;
                Err(KeeperError::TxSubmissionError(format!(
                    "nonce {nonce} was used before the lift was sent"
                )))
            }
        }
    }

    /// Advances the in-flight lift by one step: confirms, finalizes, detects
    /// reorgs, or sends it again when unanswered, refused or stuck.
    pub async fn poll(&mut self) -> Result<PollOutcome, KeeperError> {
        let status = self.in_flight()?.status.clone();
        match status {
            TxStatus::Failed(reason) => Err(KeeperError::InvalidState(format!(
                "lift already failed ({reason:?}) and must be cleared"
            ))),
            TxStatus::Confirmed {
                tx_hash,
                block_number,
                block_hash,
            } => {
                let canonical = self.client.get_block_hash(block_number).await?;
                if canonical == Some(block_hash) {
                    info!(?tx_hash, block_number, ?block_hash, "Lift finalized");
                    self.pending = None;
                    return Ok(PollOutcome::Finalized);
                }

                warn!(
                    ?tx_hash,
                    block_number,
                    expected = ?block_hash,
                    ?canonical,
                    "Lift was reorged out, resubmitting"
                );
                self.in_flight()?.status = TxStatus::Dropped;
                match self.track().await? {
                    PollOutcome::Pending
                    | PollOutcome::Resubmitted { .. }
                    | PollOutcome::Rebroadcast => Ok(PollOutcome::Reorged),
                    outcome => Ok(outcome),
                }
            }
            TxStatus::Submitted
            | TxStatus::Unacknowledged
            | TxStatus::Replaced
            | TxStatus::Dropped => self.track().await,
        }
    }

    /// Takes a failed lift out of the manager so a new one can be submitted.
    pub fn clear(&mut self) -> Option<PendingTransaction> {
        match &self.pending {
            Some(pending) if pending.status.is_terminal() => self.pending.take(),
            _ => None,
        }
    }

    fn in_flight(&mut self) -> Result<&mut PendingTransaction, KeeperError> {
        self.pending
            .as_mut()
            .ok_or_else(|| KeeperError::InvalidState("no lift in flight".to_owned()))
    }

    async fn deliver(&self, signed: &SignedTransaction) -> Delivery {
        match self.client.submit_signed_transaction(signed).await {
            Ok(_) => Delivery::Accepted,
            Err(ChainCommunicationError::NonceConsumed(_)) => Delivery::NonceConsumed,
            Err(err @ ChainCommunicationError::TxRejected(_)) => Delivery::Rejected(err),
            Err(err) => Delivery::Unacknowledged(err),
        }
    }

    /// Records how the node answered a resend of the lift.
    fn settle(
        &mut self,
        delivery: Delivery,
        head: u64,
        accepted: PollOutcome,
    ) -> Result<PollOutcome, KeeperError> {
        let pending = self.in_flight()?;
        pending.submitted_at_block = head;
        match delivery {
            Delivery::Accepted => {
                pending.status = TxStatus::Submitted;
                Ok(accepted)
            }
            Delivery::NonceConsumed => {
                // one of the tracked broadcasts is mined or about to be;
                // the receipt check settles which
                pending.status = TxStatus::Submitted;
                warn!(
                    nonce = %pending.nonce,
                    attempts = pending.attempts,
                    "Lift nonce already used, waiting for a receipt"
                );
                Ok(PollOutcome::Pending)
            }
            Delivery::Rejected(err) => {
                pending.status = TxStatus::Replaced;
                warn!(
                    tx_hash = ?pending.tx_hash,
                    attempts = pending.attempts,
                    error = %err,
                    "Lift broadcast refused"
                );
                Err(KeeperError::TxSubmissionError(err.to_string()))
            }
            Delivery::Unacknowledged(err) => {
                pending.status = TxStatus::Unacknowledged;
                warn!(
                    tx_hash = ?pending.tx_hash,
                    attempts = pending.attempts,
                    error = %err,
                    "Lift broadcast unanswered"
                );
                Err(KeeperError::TxSubmissionError(err.to_string()))
            }
        }
    }

    /// Marks the lift failed once it has used up its broadcasts.
    fn exhausted(&mut self) -> Result<Option<PollOutcome>, KeeperError> {
        let max_attempts = self.conf.max_attempts;
        let pending = self.in_flight()?;
        if pending.attempts < max_attempts {
            return Ok(None);
        }
        pending.status = TxStatus::Failed(FailureReason::AttemptsExhausted);
        Ok(Some(PollOutcome::Failed(FailureReason::AttemptsExhausted)))
    }

    /// Looks for a receipt of any broadcast and sends the lift again if its
    /// last broadcast went unanswered, was refused, dropped out, or sat
    /// unmined for too long.
    async fn track(&mut self) -> Result<PollOutcome, KeeperError> {
        let head = self.client.get_block_number().await?.block_number;
        let hashes: Vec<H256> = self.in_flight()?.tx_hashes().collect();

        for hash in hashes {
            let Some(receipt) = self.client.get_receipt(hash).await? else {
                continue;
            };
            let pending = self.in_flight()?;
            if receipt.success {
                info!(
                    tx_hash = ?hash,
                    block_number = receipt.block_number,
                    block_hash = ?receipt.block_hash,
                    nonce = %pending.nonce,
                    "Lift included"
                );
                pending.status = TxStatus::Confirmed {
                    tx_hash: hash,
                    block_number: receipt.block_number,
                    block_hash: receipt.block_hash,
                };
                return Ok(PollOutcome::Included {
                    block_number: receipt.block_number,
                });
            }
            warn!(
                tx_hash = ?hash,
                block_number = receipt.block_number,
                candidate = ?pending.target_candidate,
                "Lift reverted"
            );
            pending.status = TxStatus::Failed(FailureReason::Reverted);
            return Ok(PollOutcome::Failed(FailureReason::Reverted));
        }

        let threshold = self.conf.stuck_threshold_blocks;
        let pending = self.in_flight()?;
        match pending.status {
            TxStatus::Unacknowledged => return self.rebroadcast(head).await,
            TxStatus::Replaced | TxStatus::Dropped => return self.replace(head).await,
            _ => {}
        }
        if head >= pending.submitted_at_block.saturating_add(threshold) {
            return self.replace(head).await;
        }

        debug!(
            tx_hash = ?pending.tx_hash,
            head,
            submitted_at_block = pending.submitted_at_block,
            "Lift not mined yet"
        );
        Ok(PollOutcome::Pending)
    }

    /// Sends the latest signed lift again, byte for byte.
    async fn rebroadcast(&mut self, head: u64) -> Result<PollOutcome, KeeperError> {
        if let Some(outcome) = self.exhausted()? {
            return Ok(outcome);
        }
        let pending = self.in_flight()?;
        pending.attempts = pending.attempts.saturating_add(1);
        let signed = SignedTransaction::new(pending.tx_hash, pending.raw.clone());
        debug!(tx_hash = ?signed.tx_hash, attempts = pending.attempts, "Rebroadcasting lift");

        let delivery = self.deliver(&signed).await;
        self.settle(delivery, head, PollOutcome::Rebroadcast)
    }

    /// Sends the lift with the same nonce and an escalated price. The new
    /// broadcast is tracked before it is sent.
    async fn replace(&mut self, head: u64) -> Result<PollOutcome, KeeperError> {
        if let Some(outcome) = self.exhausted()? {
            return Ok(outcome);
        }
        let pending = self.in_flight()?;
        let (nonce, candidate, previous, attempts) = (
            pending.nonce,
            pending.target_candidate,
            pending.gas_price,
            pending.attempts,
        );

        let suggested = self.client.suggest_gas_price().await?;
        let Some(gas_price) = self.gas.escalate(previous, suggested) else {
            let pending = self.in_flight()?;
            pending.attempts = attempts.saturating_add(1);
            pending.submitted_at_block = head;
            pending.status = TxStatus::Submitted;
            warn!(
                tx_hash = ?pending.tx_hash,
                %nonce,
                gas_price = %previous,
                attempts = pending.attempts,
                "Lift is stuck at the gas price cap, waiting"
            );
            return Ok(PollOutcome::Pending);
        };

        let signed = self
            .signer
            .sign_lift(&LiftRequest::new(candidate, nonce, gas_price))
            .await?;
        let pending = self.in_flight()?;
        pending.replaced.push(BroadcastAttempt {
            tx_hash: pending.tx_hash,
            gas_price: pending.gas_price,
        });
        pending.tx_hash = signed.tx_hash;
        pending.raw = signed.raw.clone();
        pending.gas_price = gas_price;
        pending.attempts = attempts.saturating_add(1);

        let delivery = self.deliver(&signed).await;
        if matches!(delivery, Delivery::Accepted) {
            info!(
                tx_hash = ?signed.tx_hash,
                %nonce,
                previous_gas_price = %previous,
                %gas_price,
                attempts = attempts.saturating_add(1),
                "Resubmitted lift"
            );
        }
        self.settle(delivery, head, PollOutcome::Resubmitted { gas_price })
    }
}
