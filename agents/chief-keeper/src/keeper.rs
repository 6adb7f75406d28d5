use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Provider};
use ethers::signers::Signer;
use ethers::types::{Address, H256};
use eyre::{ensure, Result};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::chain::{ChainClient, EthereumChainClient};
use crate::error::{retry_backoff, IsRetryable, KeeperError};
use crate::gas::GasStrategy;
use crate::manager::{PollOutcome, SubmissionConf, TransactionManager};
use crate::settings::KeeperSettings;
use crate::signer::{LiftSigner, WalletLiftSigner};
use crate::tracker::CandidateTracker;
use crate::transaction::FailureReason;

/// Delay after the first failed tick; doubles with every further failure.
const RETRY_BASE: Duration = Duration::from_secs(1);

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing in flight and the hat already holds the most approvals
    Idle,
    Submitted { candidate: Address, tx_hash: H256 },
    /// A lift was in flight, so only its progress was checked
    Polled(PollOutcome),
}

/// Keeps the Chief's hat on the candidate with the most approvals.
#[derive(Debug)]
pub struct ChiefKeeper {
    client: Arc<dyn ChainClient>,
    tracker: CandidateTracker,
    manager: TransactionManager,
    interval: Duration,
}

impl ChiefKeeper {
    /// A keeper over an already connected client and signer. Nothing is
    /// checked against the chain here; see [`from_settings`](Self::from_settings).
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn LiftSigner>,
        gas: GasStrategy,
        submission: SubmissionConf,
        interval: Duration,
    ) -> Self {
        Self {
            manager: TransactionManager::new(client.clone(), signer, gas, submission),
            client,
            tracker: CandidateTracker,
            interval,
        }
    }

    /// Connects to the endpoint and checks the deployment. Errors here are
    /// fatal.
    pub async fn from_settings(settings: &KeeperSettings) -> Result<Self> {
        let wallet = settings.signer.wallet()?;
        ensure!(
            wallet.address() == settings.account,
            "Signer key belongs to {:?}, not to the configured account {:?}",
            wallet.address(),
            settings.account
        );

        let provider = Arc::new(Provider::new(Http::new(settings.rpc_url.clone())));
        let client = EthereumChainClient::new(
            provider,
            settings.chief_address,
            settings.chief_deployment_block,
            settings.log_chunk_size,
            settings.rpc_timeout,
        );
        let chain_id = client
            .verify_deployment(settings.chain_id, settings.account)
            .await?;

        let signer = WalletLiftSigner::new(
            wallet,
            chain_id,
            settings.chief_address,
            settings.gas.gas_limit,
        );

        info!(
            chief = ?settings.chief_address,
            account = ?settings.account,
            interval = ?settings.interval,
            max_gas_price = %settings.gas.max_price,
            "Keeper configured"
        );
        Ok(Self::new(
            Arc::new(client),
            Arc::new(signer),
            settings.gas.strategy(),
            settings.submission,
            settings.interval,
        ))
    }

    /// Polls the lift in flight or, if there is none, lifts the top
    /// candidate when it outweighs the hat.
    pub async fn tick(&mut self) -> Result<TickOutcome, KeeperError> {
        debug!(pending = self.manager.has_pending(), "Tick started");
        if self.manager.has_pending() {
            let outcome = self.manager.poll().await?;
            if let PollOutcome::Failed(reason) = outcome {
                self.abandon(reason);
            }
            return Ok(TickOutcome::Polled(outcome));
        }

        let Some(decision) = self.tracker.decide(self.client.as_ref()).await? else {
            return Ok(TickOutcome::Idle);
        };
        let pending = self.manager.submit(decision.address()).await?;
        Ok(TickOutcome::Submitted {
            candidate: pending.target_candidate,
            tx_hash: pending.tx_hash,
        })
    }

    fn abandon(&mut self, reason: FailureReason) {
        let Some(failed) = self.manager.clear() else {
            return;
        };
        match reason {
            FailureReason::Reverted => warn!(
                candidate = ?failed.target_candidate,
                nonce = %failed.nonce,
                tx_hash = ?failed.tx_hash,
                "Lift reverted, returning to idle"
            ),
            FailureReason::AttemptsExhausted => error!(
                candidate = ?failed.target_candidate,
                nonce = %failed.nonce,
                attempts = failed.attempts,
                tx_hashes = ?failed.tx_hashes().collect::<Vec<_>>(),
                gas_prices = ?failed.gas_prices(),
                "Giving up on lift after max attempts"
            ),
        }
    }

    /// Ticks every `interval` until `shutdown` is set or its sender is
    /// dropped. Shutdown is only observed between ticks.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_failures: u32 = 0;
        let mut tick: u64 = 0;

        while !*shutdown.borrow() {
            let started = Instant::now();
            let span = info_span!("tick", tick);
            let delay = match self.tick().instrument(span).await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    debug!(tick, ?outcome, "Tick finished");
                    self.interval.saturating_sub(started.elapsed())
                }
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = retry_backoff(consecutive_failures, RETRY_BASE, self.interval);
                    if err.is_retryable() {
                        warn!(tick, error = %err, consecutive_failures, ?delay, "Tick failed, retrying");
                    } else {
                        error!(tick, error = %err, consecutive_failures, ?delay, "Tick failed, retrying");
                    }
                    delay
                }
            };
            tick = tick.wrapping_add(1);

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown handle dropped");
                        break;
                    }
                }
            }
        }
        info!("Keeper stopped");
    }
}
